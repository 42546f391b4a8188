//! # coreshift
//!
//! **Live CPU-Core Migration Harness with Direct Kernel Control**
//!
//! A Rust library for launching a workload process under a strictly enforced
//! CPU and memory envelope — a cgroup v2 group it is placed into *atomically*
//! at creation time — and for rewriting that envelope while the workload is
//! running, to study performance transitions caused by live core migration.
//!
//! ## Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | **Direct Cgroup v2** | Group creation and `cpuset.cpus`/`memory.max` control via `/sys/fs/cgroup` |
//! | **Atomic Placement** | `clone3(2)` + `CLONE_INTO_CGROUP`: the child never runs unconfined |
//! | **Live Migration** | Mid-run `cpuset.cpus` rewrites, optionally paired with cpufreq directives |
//! | **Frequency Control** | Per-core governor and `scaling_setspeed` via `/sys/devices/system/cpu` |
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        coreshift                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  CgroupManager::create()                                    │
//! │         │                                                   │
//! │         ▼                                                   │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │   Cgroup    │───▶│   clone3    │───▶│ Supervisor  │      │
//! │  │ (limits+fd) │    │(INTO_CGROUP)│    │  (waitpid)  │      │
//! │  └──────┬──────┘    └─────────────┘    └─────────────┘      │
//! │         │                                                   │
//! │         ▼                                                   │
//! │  ┌─────────────┐    ┌─────────────┐                         │
//! │  │  Migration  │    │   CpuFreq   │                         │
//! │  │(cpuset.cpus)│    │ (setspeed)  │                         │
//! │  └─────────────┘    └─────────────┘                         │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use coreshift::prelude::*;
//!
//! // Confine a workload to core 0 with a 512M ceiling,
//! // then shift it to core 1 mid-run.
//! let plan = RunPlan::builder()
//!     .cgroup_name("bench0")
//!     .cpuset(CoreSet::new("0")?)
//!     .memory(MemoryLimit::parse("512M")?)
//!     .workload(["/bin/sleep", "1"])
//!     .migrate_to(CoreSet::new("1")?)
//!     .build()?;
//!
//! let report = MigrationRunner::new(plan)?.run()?;
//! println!("exit={} elapsed={:?}", report.status, report.elapsed);
//! ```
//!
//! ## Requirements
//!
//! - Linux kernel 5.7+ (`clone3` with `CLONE_INTO_CGROUP`)
//! - Cgroup v2 unified hierarchy mounted at `/sys/fs/cgroup`
//! - Privilege to create cgroup directories (typically root)
//!
//! Migration is asynchronous by nature: a successful `cpuset.cpus` write
//! means the kernel accepted the new constraint, not that the workload's
//! threads have already moved. See [`migrate::migrate`].

// Core modules
pub mod cgroup;
pub mod clone3;
pub mod cpufreq;
pub mod migrate;
pub mod runner;
pub mod supervisor;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::cgroup::{CgroupError, CgroupHandle, CgroupManager, CoreSet, MemoryLimit};
    pub use crate::clone3::{clone_flags, launch_into, Clone3Error, CloneArgs, CloneOutcome};
    pub use crate::cpufreq::{CpuFreqError, CpuFreqManager, CpuInfo, Governor};
    pub use crate::migrate::{migrate, migrate_with_frequency, MigrateError, MigrationEvent};
    pub use crate::runner::{MigrationRunner, MigrationTrigger, RunError, RunPlan, RunReport};
    pub use crate::supervisor::{ExitStatus, RunOutcome, SupervisedProcess, WaitError};
}

pub use prelude::*;

// ============================================================================
// Common Types
// ============================================================================

/// Result type for controller operations
pub type Result<T> = core::result::Result<T, runner::RunError>;

/// Process ID type
pub type Pid = u32;

// ============================================================================
// Constants
// ============================================================================

/// Default cgroup v2 mount point
pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Default group name used by the CLI
pub const DEFAULT_GROUP_NAME: &str = "bench0";

/// Default memory ceiling expression
pub const DEFAULT_MEMORY_MAX: &str = "512M";

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(CGROUP_ROOT, "/sys/fs/cgroup");
        assert_eq!(DEFAULT_MEMORY_MAX, "512M");
    }
}
