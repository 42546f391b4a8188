//! Direct Cgroup v2 Control
//!
//! Provides direct manipulation of a Linux cgroup v2 group used as a
//! resource envelope for one benchmark workload, without systemd or other
//! intermediaries.
//!
//! ## Cgroup v2 Interface Files
//!
//! | File | Description | Example |
//! |------|-------------|---------|
//! | `cpuset.cpus` | CPU cores the group may run on | `0`, `0-3`, `0,2,4` |
//! | `memory.max` | Memory ceiling | `536870912` or `max` |
//! | `cgroup.procs` | Process membership | Read for live pids |
//! | `cgroup.kill` | Kill the whole group | Write `1` |
//!
//! Limit writes are total overwrites: each write fully replaces the prior
//! value, so there is no read-modify-write race between the initial limit
//! setup and a later live migration.

use core::fmt;
use core::str::FromStr;

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::MetadataExt;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};

use crate::Pid;

// ============================================================================
// Error Types
// ============================================================================

/// Cgroup operation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CgroupError {
    /// Cgroup path does not exist
    NotFound(String),
    /// Caller lacks the privilege to manage cgroup directories.
    /// Fatal to the whole run: confinement without privilege has no safe
    /// degraded mode.
    PermissionDenied,
    /// The kernel rejected a limit value (core not present, malformed
    /// range, ceiling below usage). The group itself is unaffected and the
    /// caller may retry with a corrected value.
    LimitRejected(String),
    /// Invalid group name or limit expression
    InvalidParameter(String),
    /// The group still contains live processes
    Busy,
    /// The group was removed concurrently
    LookupFailed(String),
    /// I/O error
    IoError(String),
}

impl fmt::Display for CgroupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CgroupError::NotFound(path) => write!(f, "Cgroup not found: {}", path),
            CgroupError::PermissionDenied => write!(f, "Permission denied"),
            CgroupError::LimitRejected(msg) => write!(f, "Limit rejected by kernel: {}", msg),
            CgroupError::InvalidParameter(msg) => write!(f, "Invalid parameter: {}", msg),
            CgroupError::Busy => write!(f, "Cgroup still has live processes"),
            CgroupError::LookupFailed(path) => write!(f, "Cgroup lookup failed: {}", path),
            CgroupError::IoError(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for CgroupError {}

// ============================================================================
// Limit Expressions
// ============================================================================

/// A validated CPU-list expression for `cpuset.cpus`
///
/// Accepts single cores (`"0"`), ranges (`"0-3"`), explicit lists
/// (`"0,2,4"`) and combinations (`"0-2,4"`). The original text is written
/// to the kernel verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreSet {
    expr: String,
    cpus: Vec<u32>,
}

impl CoreSet {
    /// Parse and validate a CPU-list expression
    pub fn new(expr: &str) -> Result<Self, CgroupError> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(CgroupError::InvalidParameter("empty cpu set".into()));
        }

        let mut cpus = Vec::new();
        for token in expr.split(',') {
            let token = token.trim();
            match token.split_once('-') {
                Some((lo, hi)) => {
                    let lo: u32 = Self::parse_cpu(lo)?;
                    let hi: u32 = Self::parse_cpu(hi)?;
                    if lo > hi {
                        return Err(CgroupError::InvalidParameter(format!(
                            "inverted cpu range: {}",
                            token
                        )));
                    }
                    cpus.extend(lo..=hi);
                }
                None => cpus.push(Self::parse_cpu(token)?),
            }
        }

        cpus.sort_unstable();
        cpus.dedup();

        Ok(Self {
            expr: expr.to_string(),
            cpus,
        })
    }

    fn parse_cpu(s: &str) -> Result<u32, CgroupError> {
        s.trim()
            .parse::<u32>()
            .map_err(|_| CgroupError::InvalidParameter(format!("bad cpu id: {:?}", s)))
    }

    /// A set containing a single core
    pub fn single(cpu: u32) -> Self {
        Self {
            expr: cpu.to_string(),
            cpus: vec![cpu],
        }
    }

    /// The exact text written to `cpuset.cpus`
    pub fn as_str(&self) -> &str {
        &self.expr
    }

    /// All core ids in the set, ascending
    pub fn cpus(&self) -> &[u32] {
        &self.cpus
    }

    /// Lowest core id in the set
    pub fn first_cpu(&self) -> u32 {
        self.cpus[0]
    }
}

impl fmt::Display for CoreSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

impl FromStr for CoreSet {
    type Err = CgroupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// A memory ceiling for `memory.max`
///
/// Parsed from a byte count with an optional binary unit suffix
/// (`"512M"`, `"1G"`) or the literal `"max"` sentinel; written to the
/// kernel as a canonical byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLimit {
    /// Unrestricted
    Max,
    /// Ceiling in bytes
    Bytes(u64),
}

impl MemoryLimit {
    /// Parse a quantity expression: `"max"`, `"536870912"`, `"512M"`, `"1G"`
    pub fn parse(s: &str) -> Result<Self, CgroupError> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("max") {
            return Ok(MemoryLimit::Max);
        }

        let (digits, multiplier) = match s.as_bytes().last() {
            Some(b'K') | Some(b'k') => (&s[..s.len() - 1], 1u64 << 10),
            Some(b'M') | Some(b'm') => (&s[..s.len() - 1], 1u64 << 20),
            Some(b'G') | Some(b'g') => (&s[..s.len() - 1], 1u64 << 30),
            Some(b'T') | Some(b't') => (&s[..s.len() - 1], 1u64 << 40),
            _ => (s, 1u64),
        };

        let value: u64 = digits.trim().parse().map_err(|_| {
            CgroupError::InvalidParameter(format!("bad memory quantity: {:?}", s))
        })?;

        value
            .checked_mul(multiplier)
            .map(MemoryLimit::Bytes)
            .ok_or_else(|| {
                CgroupError::InvalidParameter(format!("memory quantity overflows: {:?}", s))
            })
    }

    /// The exact text written to `memory.max`
    pub fn to_value(self) -> String {
        match self {
            MemoryLimit::Max => "max".to_string(),
            MemoryLimit::Bytes(n) => n.to_string(),
        }
    }

    /// Ceiling in bytes, or `None` if unrestricted
    pub fn bytes(self) -> Option<u64> {
        match self {
            MemoryLimit::Max => None,
            MemoryLimit::Bytes(n) => Some(n),
        }
    }
}

impl fmt::Display for MemoryLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_value())
    }
}

impl FromStr for MemoryLimit {
    type Err = CgroupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ============================================================================
// Cgroup Handle
// ============================================================================

/// An open directory handle to a cgroup, usable as a `clone3` target
///
/// The handle is single-use by convention: open it immediately before the
/// clone call and let it drop right after, whether or not the clone
/// succeeded, so the descriptor never leaks into a still-running child
/// (the fd is additionally `O_CLOEXEC`).
#[derive(Debug)]
pub struct CgroupHandle {
    fd: RawFd,
}

impl CgroupHandle {
    /// Raw descriptor for the `clone_args.cgroup` field
    pub fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl Drop for CgroupHandle {
    fn drop(&mut self) {
        // SAFETY: fd was obtained from open(2) in open_handle and is closed
        // exactly once, here.
        unsafe {
            libc::close(self.fd);
        }
    }
}

// ============================================================================
// Cgroup Manager
// ============================================================================

/// Owner of one cgroup v2 group's lifecycle
///
/// Creates the group directory, applies limit expressions, hands out
/// clone-target handles, and removes the directory on `destroy`. The path
/// exists for the group's entire lifetime from creation until explicit
/// removal.
pub struct CgroupManager {
    /// Path to this group (e.g. /sys/fs/cgroup/bench0)
    path: PathBuf,
    /// Group name (final path component)
    name: String,
    /// Kernel-assigned identity: the directory inode at creation time
    inode: u64,
}

impl CgroupManager {
    /// Create (or reuse) a group under the default cgroup v2 root
    ///
    /// Creation is idempotent: a pre-existing directory is not an error.
    pub fn create(name: &str) -> Result<Self, CgroupError> {
        Self::create_at(Path::new(crate::CGROUP_ROOT), name)
    }

    /// Create (or reuse) a group under an explicit resource-control root
    pub fn create_at(root: &Path, name: &str) -> Result<Self, CgroupError> {
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(CgroupError::InvalidParameter(format!(
                "bad group name: {:?}",
                name
            )));
        }

        let path = root.join(name);
        if let Err(e) = fs::create_dir(&path) {
            match e.kind() {
                std::io::ErrorKind::AlreadyExists => {}
                std::io::ErrorKind::PermissionDenied => {
                    return Err(CgroupError::PermissionDenied)
                }
                std::io::ErrorKind::NotFound => {
                    return Err(CgroupError::NotFound(root.to_string_lossy().into_owned()))
                }
                _ => return Err(CgroupError::IoError(e.to_string())),
            }
        }

        let meta = fs::metadata(&path).map_err(|e| CgroupError::IoError(e.to_string()))?;

        Ok(Self {
            path,
            name: name.to_string(),
            inode: meta.ino(),
        })
    }

    /// Write a core-set expression to `cpuset.cpus`
    ///
    /// The write fully replaces the prior value. Kernel rejection surfaces
    /// as [`CgroupError::LimitRejected`] and leaves the group intact.
    pub fn set_cpuset(&self, cores: &CoreSet) -> Result<(), CgroupError> {
        self.write_limit(&self.path.join("cpuset.cpus"), cores.as_str())
    }

    /// Write a memory ceiling to `memory.max`
    pub fn set_memory(&self, limit: &MemoryLimit) -> Result<(), CgroupError> {
        self.write_limit(&self.path.join("memory.max"), &limit.to_value())
    }

    /// Read back the current `cpuset.cpus` expression (trimmed)
    pub fn cpuset(&self) -> Result<String, CgroupError> {
        Ok(Self::read_file(&self.path.join("cpuset.cpus"))?.trim().to_string())
    }

    /// Open the group directory for use as a `clone3` creation-time target
    ///
    /// The returned handle closes its descriptor on drop, on every exit
    /// path of the caller, including clone failure.
    pub fn open_handle(&self) -> Result<CgroupHandle, CgroupError> {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let path_c = CString::new(self.path.as_os_str().as_bytes())
            .map_err(|_| CgroupError::InvalidParameter("group path contains NUL".into()))?;

        // SAFETY: path_c is a valid NUL-terminated string; flags request a
        // read-only directory descriptor with close-on-exec.
        let fd = unsafe {
            libc::open(
                path_c.as_ptr(),
                libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC,
            )
        };

        if fd < 0 {
            // SAFETY: errno location is always valid after a failed syscall.
            let errno = unsafe { *libc::__errno_location() };
            return Err(match errno {
                libc::EACCES | libc::EPERM => CgroupError::PermissionDenied,
                libc::ENOENT => CgroupError::NotFound(self.path.to_string_lossy().into_owned()),
                e => CgroupError::IoError(format!("open {}: errno {}", self.path.display(), e)),
            });
        }

        Ok(CgroupHandle { fd })
    }

    /// Kernel-assigned identity number for external telemetry correlation
    ///
    /// Re-stats the directory so concurrent removal is observed as
    /// [`CgroupError::LookupFailed`] rather than a stale id.
    pub fn inode(&self) -> Result<u64, CgroupError> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.ino()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(
                CgroupError::LookupFailed(self.path.to_string_lossy().into_owned()),
            ),
            Err(e) => Err(CgroupError::IoError(e.to_string())),
        }
    }

    /// Identity recorded at creation time (no syscall)
    pub fn created_inode(&self) -> u64 {
        self.inode
    }

    /// List pids currently assigned to this group
    pub fn processes(&self) -> Result<Vec<Pid>, CgroupError> {
        let content = Self::read_file(&self.path.join("cgroup.procs"))?;
        Ok(content
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .collect())
    }

    /// Kill every process in this group
    ///
    /// Prefers the `cgroup.kill` file (Linux 5.14+); falls back to
    /// SIGKILL-per-pid with up to three passes. Returns
    /// [`CgroupError::Busy`] if processes survive all passes.
    pub fn kill_all(&self) -> Result<(), CgroupError> {
        let cgroup_kill = self.path.join("cgroup.kill");
        if cgroup_kill.exists() {
            Self::write_file(&cgroup_kill, "1")?;
            return Ok(());
        }

        for _ in 0..3 {
            let pids = self.processes()?;
            if pids.is_empty() {
                return Ok(());
            }
            for pid in pids {
                // SAFETY: pid was read from cgroup.procs; SIGKILL is always
                // a valid signal number. A stale pid yields ESRCH, ignored.
                unsafe {
                    libc::kill(pid as i32, libc::SIGKILL);
                }
            }
            std::thread::sleep(std::time::Duration::from_millis(50));
        }

        if self.processes()?.is_empty() {
            Ok(())
        } else {
            Err(CgroupError::Busy)
        }
    }

    /// Remove the group directory
    ///
    /// Fails with [`CgroupError::Busy`] while live processes remain
    /// assigned; callers treat that as a warning and continue (best-effort
    /// cleanup).
    pub fn destroy(self) -> Result<(), CgroupError> {
        if let Err(e) = fs::remove_dir(&self.path) {
            return Err(match e.kind() {
                std::io::ErrorKind::NotFound => {
                    CgroupError::NotFound(self.path.to_string_lossy().into_owned())
                }
                std::io::ErrorKind::PermissionDenied => CgroupError::PermissionDenied,
                _ => match e.raw_os_error() {
                    Some(libc::EBUSY) | Some(libc::ENOTEMPTY) => CgroupError::Busy,
                    _ => CgroupError::IoError(e.to_string()),
                },
            });
        }
        Ok(())
    }

    /// Get the group path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the group name
    pub fn name(&self) -> &str {
        &self.name
    }

    // Helper: limit-file write; kernel rejection maps to LimitRejected
    fn write_limit(&self, path: &Path, content: &str) -> Result<(), CgroupError> {
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::PermissionDenied => CgroupError::PermissionDenied,
                std::io::ErrorKind::NotFound => {
                    CgroupError::NotFound(path.to_string_lossy().into_owned())
                }
                _ => CgroupError::IoError(e.to_string()),
            })?;

        file.write_all(content.as_bytes()).map_err(|e| {
            CgroupError::LimitRejected(format!("{} <- {:?}: {}", path.display(), content, e))
        })
    }

    // Helper: write to a cgroup file
    fn write_file(path: &Path, content: &str) -> Result<(), CgroupError> {
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::PermissionDenied => CgroupError::PermissionDenied,
                std::io::ErrorKind::NotFound => {
                    CgroupError::NotFound(path.to_string_lossy().into_owned())
                }
                _ => CgroupError::IoError(e.to_string()),
            })?;

        file.write_all(content.as_bytes())
            .map_err(|e| CgroupError::IoError(e.to_string()))
    }

    // Helper: read from a cgroup file
    fn read_file(path: &Path) -> Result<String, CgroupError> {
        let mut file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                CgroupError::NotFound(path.to_string_lossy().into_owned())
            }
            std::io::ErrorKind::PermissionDenied => CgroupError::PermissionDenied,
            _ => CgroupError::IoError(e.to_string()),
        })?;

        let mut content = String::new();
        file.read_to_string(&mut content)
            .map_err(|e| CgroupError::IoError(e.to_string()))?;

        Ok(content)
    }
}

impl fmt::Debug for CgroupManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CgroupManager")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("inode", &self.inode)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_set_single() {
        let set = CoreSet::new("0").unwrap();
        assert_eq!(set.as_str(), "0");
        assert_eq!(set.cpus(), &[0]);
        assert_eq!(set.first_cpu(), 0);
    }

    #[test]
    fn test_core_set_range() {
        let set = CoreSet::new("0-3").unwrap();
        assert_eq!(set.cpus(), &[0, 1, 2, 3]);
        assert_eq!(set.to_string(), "0-3");
    }

    #[test]
    fn test_core_set_list_and_range() {
        let set = CoreSet::new("0-2,4").unwrap();
        assert_eq!(set.cpus(), &[0, 1, 2, 4]);

        let set = CoreSet::new("4,0,2").unwrap();
        assert_eq!(set.cpus(), &[0, 2, 4]);
        assert_eq!(set.as_str(), "4,0,2");
    }

    #[test]
    fn test_core_set_rejects_malformed() {
        assert!(CoreSet::new("").is_err());
        assert!(CoreSet::new("a").is_err());
        assert!(CoreSet::new("3-").is_err());
        assert!(CoreSet::new("3-1").is_err());
        assert!(CoreSet::new("0,,2").is_err());
    }

    #[test]
    fn test_core_set_from_str() {
        let set: CoreSet = "1".parse().unwrap();
        assert_eq!(set.first_cpu(), 1);
    }

    #[test]
    fn test_memory_limit_parse_suffixes() {
        assert_eq!(
            MemoryLimit::parse("512M").unwrap(),
            MemoryLimit::Bytes(512 * 1024 * 1024)
        );
        assert_eq!(
            MemoryLimit::parse("1G").unwrap(),
            MemoryLimit::Bytes(1024 * 1024 * 1024)
        );
        assert_eq!(MemoryLimit::parse("2048").unwrap(), MemoryLimit::Bytes(2048));
        assert_eq!(MemoryLimit::parse("max").unwrap(), MemoryLimit::Max);
    }

    #[test]
    fn test_memory_limit_to_value() {
        assert_eq!(MemoryLimit::parse("512M").unwrap().to_value(), "536870912");
        assert_eq!(MemoryLimit::Max.to_value(), "max");
        assert_eq!(MemoryLimit::Bytes(1024).bytes(), Some(1024));
        assert_eq!(MemoryLimit::Max.bytes(), None);
    }

    #[test]
    fn test_memory_limit_rejects_malformed() {
        assert!(MemoryLimit::parse("").is_err());
        assert!(MemoryLimit::parse("12Q").is_err());
        assert!(MemoryLimit::parse("G").is_err());
    }

    #[test]
    fn test_group_name_validation() {
        let root = Path::new("/tmp");
        assert!(matches!(
            CgroupManager::create_at(root, ""),
            Err(CgroupError::InvalidParameter(_))
        ));
        assert!(matches!(
            CgroupManager::create_at(root, "a/b"),
            Err(CgroupError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_create_is_idempotent() {
        let root = std::env::temp_dir();
        let name = format!("coreshift-test-{}", std::process::id());

        let first = CgroupManager::create_at(&root, &name).unwrap();
        let second = CgroupManager::create_at(&root, &name).unwrap();
        assert_eq!(first.path(), second.path());
        assert_eq!(first.created_inode(), second.created_inode());

        assert!(first.inode().is_ok());
        second.destroy().unwrap();
        assert!(matches!(first.inode(), Err(CgroupError::LookupFailed(_))));
    }

    #[test]
    fn test_cgroup_error_display() {
        let err = CgroupError::NotFound("/sys/fs/cgroup/test".into());
        assert!(err.to_string().contains("not found"));

        let err = CgroupError::PermissionDenied;
        assert!(err.to_string().contains("Permission denied"));

        let err = CgroupError::LimitRejected("cpuset.cpus <- \"99\"".into());
        assert!(err.to_string().contains("rejected"));

        assert!(CgroupError::Busy.to_string().contains("live processes"));
    }
}
