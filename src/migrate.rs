//! Live Core-Set Migration
//!
//! Rewrites a running group's `cpuset.cpus` to relocate where its
//! processes may subsequently be scheduled, optionally pairing the write
//! with a frequency directive for the destination core.
//!
//! ## Asynchrony
//!
//! The migration write is accepted by the kernel independently of what the
//! workload thread is doing. A successful return means the new constraint
//! is in force for future scheduling decisions — it does NOT mean any
//! thread has already moved, and there is no acknowledgment channel back
//! to user space. Callers that need "migration has taken effect" semantics
//! must poll the workload's actual placement out of band; this interface
//! intentionally does not pretend to offer that guarantee.

use core::fmt;

use std::time::SystemTime;

use crate::cgroup::{CgroupError, CgroupManager, CoreSet};
use crate::cpufreq::{CpuFreqError, CpuFreqManager};

// ============================================================================
// Error Types
// ============================================================================

/// Migration errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrateError {
    /// The core-set write was rejected; the group and the running process
    /// are unaffected
    Cgroup(CgroupError),
    /// The paired frequency directive failed
    Freq(CpuFreqError),
}

impl fmt::Display for MigrateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrateError::Cgroup(e) => write!(f, "migration rejected: {}", e),
            MigrateError::Freq(e) => write!(f, "frequency directive failed: {}", e),
        }
    }
}

impl std::error::Error for MigrateError {}

impl From<CgroupError> for MigrateError {
    fn from(e: CgroupError) -> Self {
        MigrateError::Cgroup(e)
    }
}

impl From<CpuFreqError> for MigrateError {
    fn from(e: CpuFreqError) -> Self {
        MigrateError::Freq(e)
    }
}

// ============================================================================
// Migration Event
// ============================================================================

/// Record of one core-set change applied to a live group
///
/// References the group by value only; it never owns the group. The record
/// carries no guarantee about when the scheduler actually relocated the
/// running threads — only that the kernel accepted the write at `at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationEvent {
    /// Core-set text read back from the group immediately before the
    /// write (empty when the group still inherited its parent's set)
    pub from: String,
    /// Core set after the write
    pub to: CoreSet,
    /// Wall-clock timestamp of the accepted write
    pub at: SystemTime,
}

impl fmt::Display for MigrationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpuset {} -> {}", self.from, self.to)
    }
}

// ============================================================================
// Migration Operations
// ============================================================================

/// Rewrite a live group's core set
///
/// The write fully replaces the prior value while the supervised process
/// may still be running. A subsequent read of `cpuset.cpus` reflects the
/// new set immediately, regardless of the child's actual placement.
/// Kernel rejection surfaces as [`CgroupError::LimitRejected`] and leaves
/// the group and its processes unaffected.
pub fn migrate(group: &CgroupManager, new_set: &CoreSet) -> Result<MigrationEvent, CgroupError> {
    let from = group.cpuset()?;
    group.set_cpuset(new_set)?;

    Ok(MigrationEvent {
        from,
        to: new_set.clone(),
        at: SystemTime::now(),
    })
}

/// Rewrite a live group's core set with a paired frequency directive
///
/// Pins the destination set's first core to `khz` immediately before the
/// core-set write, so the workload lands on a core already running at the
/// target speed. The two writes are issued at the same logical instant
/// but remain two kernel operations; the asynchrony notes on [`migrate`]
/// apply to both.
pub fn migrate_with_frequency(
    group: &CgroupManager,
    new_set: &CoreSet,
    freq: &CpuFreqManager,
    khz: u64,
) -> Result<MigrationEvent, MigrateError> {
    freq.set_frequency(new_set.first_cpu(), khz)?;
    Ok(migrate(group, new_set)?)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_display() {
        let event = MigrationEvent {
            from: "0".to_string(),
            to: CoreSet::new("1").unwrap(),
            at: SystemTime::UNIX_EPOCH,
        };
        assert_eq!(event.to_string(), "cpuset 0 -> 1");
    }

    #[test]
    fn test_event_retains_old_and_new() {
        let event = MigrationEvent {
            from: "0-3".to_string(),
            to: CoreSet::new("4,5").unwrap(),
            at: SystemTime::now(),
        };
        assert_eq!(event.from, "0-3");
        assert_eq!(event.to.cpus(), &[4, 5]);
    }

    #[test]
    fn test_migrate_error_display() {
        let err = MigrateError::Cgroup(CgroupError::LimitRejected("cpuset.cpus".into()));
        assert!(err.to_string().contains("migration rejected"));

        let err = MigrateError::Freq(CpuFreqError::InvalidCpu(9));
        assert!(err.to_string().contains("frequency directive"));
    }
}
