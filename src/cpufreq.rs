//! Per-Core CPU Frequency Control
//!
//! Drives the cpufreq sysfs interface under `/sys/devices/system/cpu` to
//! pin a core to a target frequency around a migration: the destination
//! core's speed is part of the resource envelope being studied, so the
//! harness sets it explicitly instead of leaving it to the stock governor.
//!
//! ## Sysfs Interface Files (per `cpu<N>/cpufreq/`)
//!
//! | File | Description |
//! |------|-------------|
//! | `scaling_cur_freq` | Current frequency (kHz) |
//! | `cpuinfo_min_freq` / `cpuinfo_max_freq` | Hardware bounds (kHz) |
//! | `scaling_min_freq` / `scaling_max_freq` | Governor bounds (kHz) |
//! | `scaling_governor` | Active governor |
//! | `scaling_available_governors` | Governors this core supports |
//! | `scaling_setspeed` | Target frequency (userspace governor only) |
//! | `scaling_driver` | Backing driver |
//!
//! Pinning a frequency requires the `userspace` governor; `set_frequency`
//! switches the governor first, then writes `scaling_setspeed`.

use core::fmt;
use core::str::FromStr;

use std::fs;
use std::path::{Path, PathBuf};

/// Sysfs root of the per-CPU device tree
pub const SYSFS_CPU_ROOT: &str = "/sys/devices/system/cpu";

// ============================================================================
// Error Types
// ============================================================================

/// Cpufreq operation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CpuFreqError {
    /// CPU id outside the discovered range
    InvalidCpu(u32),
    /// The cpufreq interface is absent for this CPU
    NotAvailable(u32),
    /// Requested governor is not in scaling_available_governors
    GovernorNotAvailable { cpu: u32, governor: String },
    /// Frequency outside the hardware bounds
    OutOfRange { khz: u64, min: u64, max: u64 },
    /// Unrecognized governor name
    UnknownGovernor(String),
    /// A sysfs value failed to parse
    ParseError(String),
    /// I/O error
    IoError(String),
}

impl fmt::Display for CpuFreqError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpuFreqError::InvalidCpu(cpu) => write!(f, "invalid CPU id: {}", cpu),
            CpuFreqError::NotAvailable(cpu) => {
                write!(f, "cpufreq not available for CPU {}", cpu)
            }
            CpuFreqError::GovernorNotAvailable { cpu, governor } => {
                write!(f, "governor {} not available for CPU {}", governor, cpu)
            }
            CpuFreqError::OutOfRange { khz, min, max } => {
                write!(f, "frequency {} kHz out of range [{}, {}]", khz, min, max)
            }
            CpuFreqError::UnknownGovernor(name) => write!(f, "unknown governor: {}", name),
            CpuFreqError::ParseError(msg) => write!(f, "parse error: {}", msg),
            CpuFreqError::IoError(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for CpuFreqError {}

// ============================================================================
// Governors
// ============================================================================

/// Cpufreq scaling governors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Governor {
    Performance,
    Powersave,
    Userspace,
    Ondemand,
    Conservative,
    Schedutil,
}

impl Governor {
    /// Sysfs name of the governor
    pub fn as_str(&self) -> &'static str {
        match self {
            Governor::Performance => "performance",
            Governor::Powersave => "powersave",
            Governor::Userspace => "userspace",
            Governor::Ondemand => "ondemand",
            Governor::Conservative => "conservative",
            Governor::Schedutil => "schedutil",
        }
    }
}

impl fmt::Display for Governor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Governor {
    type Err = CpuFreqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "performance" => Ok(Governor::Performance),
            "powersave" => Ok(Governor::Powersave),
            "userspace" => Ok(Governor::Userspace),
            "ondemand" => Ok(Governor::Ondemand),
            "conservative" => Ok(Governor::Conservative),
            "schedutil" => Ok(Governor::Schedutil),
            other => Err(CpuFreqError::UnknownGovernor(other.to_string())),
        }
    }
}

// ============================================================================
// CPU Info
// ============================================================================

/// Snapshot of one core's cpufreq state
#[derive(Debug, Clone)]
pub struct CpuInfo {
    /// Core id
    pub cpu: u32,
    /// Current frequency in kHz
    pub cur_freq_khz: u64,
    /// Hardware minimum in kHz
    pub min_freq_khz: u64,
    /// Hardware maximum in kHz
    pub max_freq_khz: u64,
    /// Governor lower bound in kHz
    pub scaling_min_khz: u64,
    /// Governor upper bound in kHz
    pub scaling_max_khz: u64,
    /// Active governor name
    pub governor: String,
    /// Governors this core supports
    pub available_governors: Vec<String>,
    /// Backing scaling driver
    pub driver: String,
}

// ============================================================================
// Frequency Manager
// ============================================================================

/// Per-core frequency and governor control
pub struct CpuFreqManager {
    root: PathBuf,
    num_cpus: u32,
}

impl CpuFreqManager {
    /// Discover the CPU count from the sysfs device tree
    pub fn new() -> Result<Self, CpuFreqError> {
        Self::new_at(Path::new(SYSFS_CPU_ROOT))
    }

    /// Discover from an explicit sysfs root
    pub fn new_at(root: &Path) -> Result<Self, CpuFreqError> {
        let entries = fs::read_dir(root).map_err(|e| CpuFreqError::IoError(e.to_string()))?;

        let mut count = 0u32;
        for entry in entries {
            let entry = entry.map_err(|e| CpuFreqError::IoError(e.to_string()))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(suffix) = name.strip_prefix("cpu") {
                if !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) {
                    count += 1;
                }
            }
        }

        Ok(Self {
            root: root.to_path_buf(),
            num_cpus: count,
        })
    }

    /// Number of cores discovered
    pub fn num_cpus(&self) -> u32 {
        self.num_cpus
    }

    /// Read a core's cpufreq snapshot
    pub fn cpu_info(&self, cpu: u32) -> Result<CpuInfo, CpuFreqError> {
        let dir = self.cpufreq_dir(cpu)?;

        Ok(CpuInfo {
            cpu,
            cur_freq_khz: read_u64(&dir.join("scaling_cur_freq"))?,
            min_freq_khz: read_u64(&dir.join("cpuinfo_min_freq"))?,
            max_freq_khz: read_u64(&dir.join("cpuinfo_max_freq"))?,
            scaling_min_khz: read_u64(&dir.join("scaling_min_freq"))?,
            scaling_max_khz: read_u64(&dir.join("scaling_max_freq"))?,
            governor: read_string(&dir.join("scaling_governor"))?.trim().to_string(),
            available_governors: read_string(&dir.join("scaling_available_governors"))?
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            driver: read_string(&dir.join("scaling_driver"))?.trim().to_string(),
        })
    }

    /// Switch a core's scaling governor
    ///
    /// Validated against `scaling_available_governors` before the write.
    pub fn set_governor(&self, cpu: u32, governor: Governor) -> Result<(), CpuFreqError> {
        let dir = self.cpufreq_dir(cpu)?;
        let info = self.cpu_info(cpu)?;

        if !info
            .available_governors
            .iter()
            .any(|g| g == governor.as_str())
        {
            return Err(CpuFreqError::GovernorNotAvailable {
                cpu,
                governor: governor.as_str().to_string(),
            });
        }

        write_string(&dir.join("scaling_governor"), governor.as_str())
    }

    /// Read a core's active governor
    pub fn governor(&self, cpu: u32) -> Result<Governor, CpuFreqError> {
        self.cpu_info(cpu)?.governor.parse()
    }

    /// Set the governor lower bound, range-checked against hardware limits
    pub fn set_min_frequency(&self, cpu: u32, khz: u64) -> Result<(), CpuFreqError> {
        let dir = self.cpufreq_dir(cpu)?;
        let info = self.cpu_info(cpu)?;
        check_range(khz, info.min_freq_khz, info.max_freq_khz)?;
        write_string(&dir.join("scaling_min_freq"), &khz.to_string())
    }

    /// Set the governor upper bound, range-checked against hardware limits
    pub fn set_max_frequency(&self, cpu: u32, khz: u64) -> Result<(), CpuFreqError> {
        let dir = self.cpufreq_dir(cpu)?;
        let info = self.cpu_info(cpu)?;
        check_range(khz, info.min_freq_khz, info.max_freq_khz)?;
        write_string(&dir.join("scaling_max_freq"), &khz.to_string())
    }

    /// Pin a core to a target frequency
    ///
    /// Switches to the `userspace` governor first, then writes
    /// `scaling_setspeed`.
    pub fn set_frequency(&self, cpu: u32, khz: u64) -> Result<(), CpuFreqError> {
        self.set_governor(cpu, Governor::Userspace)?;
        let dir = self.cpufreq_dir(cpu)?;
        write_string(&dir.join("scaling_setspeed"), &khz.to_string())
    }

    // Helper: validated cpufreq directory for one core
    fn cpufreq_dir(&self, cpu: u32) -> Result<PathBuf, CpuFreqError> {
        if cpu >= self.num_cpus {
            return Err(CpuFreqError::InvalidCpu(cpu));
        }
        let dir = self.root.join(format!("cpu{}/cpufreq", cpu));
        if !dir.exists() {
            return Err(CpuFreqError::NotAvailable(cpu));
        }
        Ok(dir)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn check_range(khz: u64, min: u64, max: u64) -> Result<(), CpuFreqError> {
    if khz < min || khz > max {
        return Err(CpuFreqError::OutOfRange { khz, min, max });
    }
    Ok(())
}

fn read_u64(path: &Path) -> Result<u64, CpuFreqError> {
    let content = read_string(path)?;
    content
        .trim()
        .parse()
        .map_err(|_| CpuFreqError::ParseError(format!("{}: {:?}", path.display(), content.trim())))
}

fn read_string(path: &Path) -> Result<String, CpuFreqError> {
    fs::read_to_string(path).map_err(|e| CpuFreqError::IoError(format!("{}: {}", path.display(), e)))
}

fn write_string(path: &Path, value: &str) -> Result<(), CpuFreqError> {
    fs::write(path, value).map_err(|e| CpuFreqError::IoError(format!("{}: {}", path.display(), e)))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_governor_round_trip() {
        for gov in [
            Governor::Performance,
            Governor::Powersave,
            Governor::Userspace,
            Governor::Ondemand,
            Governor::Conservative,
            Governor::Schedutil,
        ] {
            assert_eq!(gov.as_str().parse::<Governor>().unwrap(), gov);
        }
    }

    #[test]
    fn test_governor_parse_trims() {
        assert_eq!("userspace\n".parse::<Governor>().unwrap(), Governor::Userspace);
        assert!("turbo".parse::<Governor>().is_err());
    }

    #[test]
    fn test_check_range() {
        assert!(check_range(1_000_000, 800_000, 4_000_000).is_ok());
        assert!(matches!(
            check_range(500_000, 800_000, 4_000_000),
            Err(CpuFreqError::OutOfRange { .. })
        ));
        assert!(matches!(
            check_range(5_000_000, 800_000, 4_000_000),
            Err(CpuFreqError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_invalid_cpu_rejected() {
        let mgr = CpuFreqManager {
            root: PathBuf::from(SYSFS_CPU_ROOT),
            num_cpus: 2,
        };
        assert!(matches!(
            mgr.cpufreq_dir(2),
            Err(CpuFreqError::InvalidCpu(2))
        ));
    }

    #[test]
    fn test_error_display() {
        let err = CpuFreqError::OutOfRange {
            khz: 1,
            min: 2,
            max: 3,
        };
        assert!(err.to_string().contains("out of range"));

        let err = CpuFreqError::GovernorNotAvailable {
            cpu: 0,
            governor: "userspace".into(),
        };
        assert!(err.to_string().contains("not available"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_discovers_cpus() {
        let mgr = CpuFreqManager::new().unwrap();
        assert!(mgr.num_cpus() >= 1);
    }
}
