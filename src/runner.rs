//! Migration Run Orchestration
//!
//! Drives one complete confined run: create the group, apply the resource
//! envelope, launch the workload atomically inside it, optionally shift
//! its core set (and destination-core frequency) mid-flight, supervise to
//! completion, and tear the group down.
//!
//! ## Lifecycle
//!
//! ```text
//! create → limits → frequency → launch → [migrate] → wait → destroy
//!                                  │                          │
//!                            handle released            best-effort
//!                             on all paths           (Busy = warning)
//! ```
//!
//! Teardown always runs after a launch attempt, successful or not, and its
//! failures are reported as warnings, never re-raised over a prior, more
//! specific failure.

use core::fmt;
use core::time::Duration;

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::cgroup::{CgroupError, CgroupManager, CoreSet, MemoryLimit};
use crate::clone3::{self, Clone3Error};
use crate::cpufreq::{CpuFreqError, CpuFreqManager};
use crate::migrate::{migrate, migrate_with_frequency, MigrateError, MigrationEvent};
use crate::supervisor::{ExitStatus, SupervisedProcess, WaitError};
use crate::Pid;

// ============================================================================
// Error Types
// ============================================================================

/// Controller-level run errors
///
/// A workload exiting non-zero is NOT one of these: that outcome is
/// reported as data in the [`RunReport`].
#[derive(Debug)]
pub enum RunError {
    /// Cgroup error
    Cgroup(CgroupError),
    /// Process creation error
    Clone(Clone3Error),
    /// Supervision error (outcome unknowable)
    Wait(WaitError),
    /// Frequency control error
    Freq(CpuFreqError),
    /// Invalid run plan
    Config(String),
    /// I/O error (results file)
    IoError(String),
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunError::Cgroup(e) => write!(f, "cgroup: {}", e),
            RunError::Clone(e) => write!(f, "launch: {}", e),
            RunError::Wait(e) => write!(f, "supervise: {}", e),
            RunError::Freq(e) => write!(f, "cpufreq: {}", e),
            RunError::Config(msg) => write!(f, "config: {}", msg),
            RunError::IoError(msg) => write!(f, "I/O: {}", msg),
        }
    }
}

impl std::error::Error for RunError {}

impl From<CgroupError> for RunError {
    fn from(e: CgroupError) -> Self {
        RunError::Cgroup(e)
    }
}

impl From<Clone3Error> for RunError {
    fn from(e: Clone3Error) -> Self {
        RunError::Clone(e)
    }
}

impl From<WaitError> for RunError {
    fn from(e: WaitError) -> Self {
        RunError::Wait(e)
    }
}

impl From<CpuFreqError> for RunError {
    fn from(e: CpuFreqError) -> Self {
        RunError::Freq(e)
    }
}

impl From<MigrateError> for RunError {
    fn from(e: MigrateError) -> Self {
        match e {
            MigrateError::Cgroup(e) => RunError::Cgroup(e),
            MigrateError::Freq(e) => RunError::Freq(e),
        }
    }
}

// ============================================================================
// Migration Trigger
// ============================================================================

/// When the mid-run migration fires, relative to the launch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationTrigger {
    /// Right after the launch returns
    Immediate,
    /// After a fixed delay
    After(Duration),
    /// When the operator presses Enter (also gates the launch itself, so
    /// an external telemetry recorder can be armed first)
    Confirm,
}

// ============================================================================
// Run Plan
// ============================================================================

/// Everything one confined run needs
#[derive(Debug, Clone)]
pub struct RunPlan {
    /// Cgroup name under the resource-control root
    pub cgroup_name: String,
    /// Initial core set
    pub cpuset: CoreSet,
    /// Memory ceiling
    pub memory: MemoryLimit,
    /// Workload command and argument vector
    pub workload: Vec<String>,
    /// Frequency (kHz) to pin the initial set's first core to
    pub cpu_freq_khz: Option<u64>,
    /// Core set to migrate to mid-run
    pub migrate_to: Option<CoreSet>,
    /// Frequency (kHz) for the destination core
    pub migrate_freq_khz: Option<u64>,
    /// When the migration fires
    pub trigger: MigrationTrigger,
    /// Results file to append a run record to
    pub output: Option<PathBuf>,
}

impl RunPlan {
    /// Create a new plan builder
    pub fn builder() -> RunPlanBuilder {
        RunPlanBuilder::new()
    }
}

/// Builder for [`RunPlan`]
#[derive(Debug, Clone)]
pub struct RunPlanBuilder {
    cgroup_name: String,
    cpuset: CoreSet,
    memory: MemoryLimit,
    workload: Vec<String>,
    cpu_freq_khz: Option<u64>,
    migrate_to: Option<CoreSet>,
    migrate_freq_khz: Option<u64>,
    trigger: MigrationTrigger,
    output: Option<PathBuf>,
}

impl RunPlanBuilder {
    /// Create a builder with defaults: group `bench0`, core 0, 512M
    pub fn new() -> Self {
        Self {
            cgroup_name: crate::DEFAULT_GROUP_NAME.to_string(),
            cpuset: CoreSet::single(0),
            memory: MemoryLimit::Bytes(512 * 1024 * 1024),
            workload: Vec::new(),
            cpu_freq_khz: None,
            migrate_to: None,
            migrate_freq_khz: None,
            trigger: MigrationTrigger::Immediate,
            output: None,
        }
    }

    /// Set the cgroup name
    pub fn cgroup_name(mut self, name: impl Into<String>) -> Self {
        self.cgroup_name = name.into();
        self
    }

    /// Set the initial core set
    pub fn cpuset(mut self, cores: CoreSet) -> Self {
        self.cpuset = cores;
        self
    }

    /// Set the memory ceiling
    pub fn memory(mut self, limit: MemoryLimit) -> Self {
        self.memory = limit;
        self
    }

    /// Set the workload command and arguments
    pub fn workload<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.workload = argv.into_iter().map(Into::into).collect();
        self
    }

    /// Pin the initial set's first core to this frequency (kHz)
    pub fn cpu_freq_khz(mut self, khz: u64) -> Self {
        self.cpu_freq_khz = Some(khz);
        self
    }

    /// Migrate to this core set mid-run
    pub fn migrate_to(mut self, cores: CoreSet) -> Self {
        self.migrate_to = Some(cores);
        self
    }

    /// Pin the destination core to this frequency (kHz) at migration time
    pub fn migrate_freq_khz(mut self, khz: u64) -> Self {
        self.migrate_freq_khz = Some(khz);
        self
    }

    /// Set the migration trigger
    pub fn trigger(mut self, trigger: MigrationTrigger) -> Self {
        self.trigger = trigger;
        self
    }

    /// Append a run record to this file
    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    /// Build the plan
    pub fn build(self) -> Result<RunPlan, RunError> {
        if self.workload.is_empty() {
            return Err(RunError::Config("empty workload command".into()));
        }

        Ok(RunPlan {
            cgroup_name: self.cgroup_name,
            cpuset: self.cpuset,
            memory: self.memory,
            workload: self.workload,
            cpu_freq_khz: self.cpu_freq_khz,
            migrate_to: self.migrate_to,
            migrate_freq_khz: self.migrate_freq_khz,
            trigger: self.trigger,
            output: self.output,
        })
    }
}

impl Default for RunPlanBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Run Report
// ============================================================================

/// Outcome of one confined run, reported as data
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Group name the workload ran in
    pub cgroup_name: String,
    /// Kernel-assigned group identity (inode), for telemetry correlation
    pub cgroup_id: u64,
    /// Workload pid
    pub pid: Pid,
    /// How the workload terminated
    pub status: ExitStatus,
    /// Wall-clock run time
    pub elapsed: Duration,
    /// The migration applied mid-run, if any
    pub migration: Option<MigrationEvent>,
}

impl RunReport {
    /// One comma-separated record line for downstream tooling
    ///
    /// Columns: group, cgroup id, pid, exit, elapsed ms, from-set, to-set.
    /// The exit column is the code for a normal exit, `sig<N>` otherwise;
    /// the set columns are empty when no migration was applied.
    pub fn record_line(&self) -> String {
        let exit = match self.status {
            ExitStatus::Exited(code) => code.to_string(),
            ExitStatus::Signaled(sig) => format!("sig{}", sig),
        };
        let (from, to) = match &self.migration {
            Some(event) => (event.from.clone(), event.to.to_string()),
            None => (String::new(), String::new()),
        };

        format!(
            "{},{},{},{},{},{},{}",
            self.cgroup_name,
            self.cgroup_id,
            self.pid,
            exit,
            self.elapsed.as_millis(),
            from,
            to
        )
    }

    /// Append the record line to a results file
    pub fn append_record(&self, path: &Path) -> Result<(), RunError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| RunError::IoError(format!("{}: {}", path.display(), e)))?;

        writeln!(file, "{}", self.record_line())
            .map_err(|e| RunError::IoError(format!("{}: {}", path.display(), e)))
    }
}

// ============================================================================
// Migration Runner
// ============================================================================

/// Single-run controller: owns the group lifecycle end to end
pub struct MigrationRunner {
    group: CgroupManager,
    freq: Option<CpuFreqManager>,
    plan: RunPlan,
}

impl MigrationRunner {
    /// Create the group and gather the managers for one run
    ///
    /// An unavailable cpufreq tree degrades frequency control to a logged
    /// warning rather than failing the run; the confinement itself never
    /// degrades.
    pub fn new(plan: RunPlan) -> Result<Self, RunError> {
        let group = CgroupManager::create(&plan.cgroup_name)?;

        let freq = match CpuFreqManager::new() {
            Ok(mgr) => Some(mgr),
            Err(e) => {
                log::warn!("could not initialize CPU frequency manager: {}", e);
                None
            }
        };

        Ok(Self { group, freq, plan })
    }

    /// Group created for this run
    pub fn group(&self) -> &CgroupManager {
        &self.group
    }

    /// Execute the run to completion
    ///
    /// The group is destroyed afterwards on every path; a `Busy` (or any
    /// other) teardown failure is logged and never shadows the run's own
    /// result.
    pub fn run(self) -> Result<RunReport, RunError> {
        let Self { group, freq, plan } = self;

        let result = Self::execute(&group, freq.as_ref(), &plan);

        // Best-effort teardown: reclaim stragglers the workload may have
        // spawned, then remove the directory. Failures here are warnings
        // and never shadow the run's own result.
        match group.processes() {
            Ok(pids) if !pids.is_empty() => {
                log::warn!("{} process(es) still in group at teardown, killing", pids.len());
                if let Err(e) = group.kill_all() {
                    log::warn!("could not clear group: {}", e);
                }
            }
            _ => {}
        }
        if let Err(e) = group.destroy() {
            log::warn!("cgroup teardown failed (continuing): {}", e);
        }

        result
    }

    fn execute(
        group: &CgroupManager,
        freq: Option<&CpuFreqManager>,
        plan: &RunPlan,
    ) -> Result<RunReport, RunError> {
        group.set_cpuset(&plan.cpuset)?;
        group.set_memory(&plan.memory)?;
        let cgroup_id = group.inode()?;

        if let Some(khz) = plan.cpu_freq_khz {
            match freq {
                Some(mgr) => mgr.set_frequency(plan.cpuset.first_cpu(), khz)?,
                None => log::warn!("frequency manager unavailable; cpu-freq directive skipped"),
            }
        }

        if plan.trigger == MigrationTrigger::Confirm {
            wait_for_enter("ready to launch");
        }

        let argv: Vec<&str> = plan.workload.iter().map(String::as_str).collect();
        let handle = group.open_handle()?;
        let launched = clone3::launch_into(&handle, &argv);
        drop(handle);
        let pid = launched?;

        let child = SupervisedProcess::new(pid);
        log::info!(
            "launched {:?} as pid {} in group {} (id {})",
            plan.workload[0],
            pid,
            group.name(),
            cgroup_id
        );

        let migration = match &plan.migrate_to {
            Some(target) => {
                match plan.trigger {
                    MigrationTrigger::Immediate => {}
                    MigrationTrigger::After(delay) => std::thread::sleep(delay),
                    MigrationTrigger::Confirm => wait_for_enter("ready to migrate"),
                }

                let applied = match (plan.migrate_freq_khz, freq) {
                    (Some(khz), Some(mgr)) => {
                        migrate_with_frequency(group, target, mgr, khz).map_err(RunError::from)
                    }
                    (Some(_), None) => {
                        log::warn!(
                            "frequency manager unavailable; migrating without frequency directive"
                        );
                        migrate(group, target).map_err(RunError::from)
                    }
                    (None, _) => migrate(group, target).map_err(RunError::from),
                };

                let event = match applied {
                    Ok(event) => event,
                    Err(e) => {
                        // The workload is unaffected by the rejected write
                        // but this run is over; don't leave it running
                        // past teardown.
                        log::warn!("terminating workload after failed migration");
                        let _ = child.terminate();
                        let _ = child.wait();
                        return Err(e);
                    }
                };

                log::info!("applied {} (kernel accepted; relocation is asynchronous)", event);
                Some(event)
            }
            None => None,
        };

        let outcome = child.wait()?;

        let report = RunReport {
            cgroup_name: group.name().to_string(),
            cgroup_id,
            pid,
            status: outcome.status,
            elapsed: outcome.elapsed,
            migration,
        };

        if let Some(path) = &plan.output {
            report.append_record(path)?;
        }

        Ok(report)
    }
}

// Operator synchronization point: block until Enter is pressed.
fn wait_for_enter(prompt: &str) {
    use std::io::{BufRead, Write};

    eprint!("{} — press Enter to continue ", prompt);
    let _ = std::io::stderr().flush();
    let mut line = String::new();
    let _ = std::io::stdin().lock().read_line(&mut line);
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    #[test]
    fn test_plan_builder_defaults() {
        let plan = RunPlan::builder().workload(["/bin/true"]).build().unwrap();
        assert_eq!(plan.cgroup_name, crate::DEFAULT_GROUP_NAME);
        assert_eq!(plan.cpuset.as_str(), "0");
        assert_eq!(plan.memory, MemoryLimit::Bytes(512 * 1024 * 1024));
        assert_eq!(plan.trigger, MigrationTrigger::Immediate);
        assert!(plan.migrate_to.is_none());
        assert!(plan.output.is_none());
    }

    #[test]
    fn test_plan_builder_full() {
        let plan = RunPlan::builder()
            .cgroup_name("bench1")
            .cpuset(CoreSet::new("0-1").unwrap())
            .memory(MemoryLimit::parse("1G").unwrap())
            .workload(["/bin/sleep", "2"])
            .cpu_freq_khz(1_000_000)
            .migrate_to(CoreSet::new("2").unwrap())
            .migrate_freq_khz(3_000_000)
            .trigger(MigrationTrigger::After(Duration::from_millis(500)))
            .output("/tmp/runs.csv")
            .build()
            .unwrap();

        assert_eq!(plan.cgroup_name, "bench1");
        assert_eq!(plan.workload, vec!["/bin/sleep", "2"]);
        assert_eq!(plan.cpu_freq_khz, Some(1_000_000));
        assert_eq!(plan.migrate_to.as_ref().unwrap().as_str(), "2");
        assert_eq!(
            plan.trigger,
            MigrationTrigger::After(Duration::from_millis(500))
        );
    }

    #[test]
    fn test_plan_requires_workload() {
        assert!(matches!(
            RunPlan::builder().build(),
            Err(RunError::Config(_))
        ));
    }

    #[test]
    fn test_report_record_line() {
        let report = RunReport {
            cgroup_name: "bench0".into(),
            cgroup_id: 42,
            pid: 1234,
            status: ExitStatus::Exited(0),
            elapsed: Duration::from_millis(1005),
            migration: Some(MigrationEvent {
                from: "0".to_string(),
                to: CoreSet::new("1").unwrap(),
                at: SystemTime::now(),
            }),
        };

        assert_eq!(report.record_line(), "bench0,42,1234,0,1005,0,1");
    }

    #[test]
    fn test_report_record_line_signaled_no_migration() {
        let report = RunReport {
            cgroup_name: "bench0".into(),
            cgroup_id: 42,
            pid: 1234,
            status: ExitStatus::Signaled(9),
            elapsed: Duration::from_millis(250),
            migration: None,
        };

        assert_eq!(report.record_line(), "bench0,42,1234,sig9,250,,");
    }

    #[test]
    fn test_run_error_from_and_display() {
        let err: RunError = CgroupError::PermissionDenied.into();
        assert!(err.to_string().starts_with("cgroup:"));

        let err: RunError = Clone3Error::CloneFailed(9).into();
        assert!(err.to_string().starts_with("launch:"));

        let err: RunError = WaitError::WaitFailed(10).into();
        assert!(err.to_string().starts_with("supervise:"));

        let err: RunError = MigrateError::Freq(CpuFreqError::InvalidCpu(3)).into();
        assert!(err.to_string().starts_with("cpufreq:"));
    }
}
