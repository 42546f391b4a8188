//! coreshift CLI
//!
//! Launches a workload confined to a cgroup v2 group (atomically, via
//! clone3 + CLONE_INTO_CGROUP) and optionally rewrites the group's core
//! set — and the destination core's frequency — while the workload runs.
//!
//! ```bash
//! # Run a benchmark on core 0 at 1 GHz, shift it to core 1 after 500ms
//! sudo coreshift --cgroup-name bench0 --cpuset 0 --memory 512M \
//!     --cpu-freq 1000000 --migrate-to 1 --migrate-after 0.5 \
//!     -- /usr/bin/python3 benchmarks/linpack.py
//! ```
//!
//! The controller's own exit code reflects controller-level failure only
//! (privilege, creation failure, unknowable outcome). The workload's exit
//! status is printed as data and never mapped onto the controller's exit
//! code.

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use coreshift::prelude::*;

#[derive(Debug, Parser)]
#[command(
    name = "coreshift",
    version,
    about = "Run a workload inside a cgroup v2 envelope and migrate its core set mid-run"
)]
struct Args {
    /// Name of the cgroup to manage (e.g. 'migration-test')
    #[arg(long, default_value = coreshift::DEFAULT_GROUP_NAME)]
    cgroup_name: String,

    /// Initial CPU set for the cgroup (e.g. '0', '0-3', '0,2,4')
    #[arg(long, default_value = "0")]
    cpuset: String,

    /// Memory ceiling (e.g. '512M', '1G', or 'max')
    #[arg(long, default_value = coreshift::DEFAULT_MEMORY_MAX)]
    memory: String,

    /// Pin the initial core to this frequency in kHz (e.g. 1000000)
    #[arg(long)]
    cpu_freq: Option<u64>,

    /// Core set to migrate to while the workload is running
    #[arg(long)]
    migrate_to: Option<String>,

    /// Frequency in kHz for the destination core, applied at migration time
    #[arg(long, requires = "migrate_to")]
    migrate_freq: Option<u64>,

    /// Seconds after launch before the migration fires (default: immediate)
    #[arg(long, requires = "migrate_to", conflicts_with = "confirm")]
    migrate_after: Option<f64>,

    /// Wait for an Enter keypress before launching and before migrating
    /// (synchronization points for an external telemetry recorder)
    #[arg(long)]
    confirm: bool,

    /// Append a run record line to this file
    #[arg(long)]
    output: Option<PathBuf>,

    /// Workload command and arguments
    #[arg(required = true, allow_hyphen_values = true, trailing_var_arg = true)]
    workload: Vec<String>,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("coreshift: {:#}", e);
        process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    let cpuset = CoreSet::new(&args.cpuset).context("parsing --cpuset")?;
    let memory = MemoryLimit::parse(&args.memory).context("parsing --memory")?;

    let trigger = if args.confirm {
        MigrationTrigger::Confirm
    } else if let Some(secs) = args.migrate_after {
        MigrationTrigger::After(Duration::from_secs_f64(secs))
    } else {
        MigrationTrigger::Immediate
    };

    let mut builder = RunPlan::builder()
        .cgroup_name(&args.cgroup_name)
        .cpuset(cpuset)
        .memory(memory)
        .workload(args.workload.iter().cloned())
        .trigger(trigger);

    if let Some(khz) = args.cpu_freq {
        builder = builder.cpu_freq_khz(khz);
    }
    if let Some(expr) = &args.migrate_to {
        builder = builder.migrate_to(CoreSet::new(expr).context("parsing --migrate-to")?);
    }
    if let Some(khz) = args.migrate_freq {
        builder = builder.migrate_freq_khz(khz);
    }
    if let Some(path) = &args.output {
        builder = builder.output(path);
    }

    let plan = builder.build().context("building run plan")?;

    let runner = MigrationRunner::new(plan).context("creating resource group")?;
    let report = runner.run().context("supervising workload")?;

    println!("group {} (cgroup id {})", report.cgroup_name, report.cgroup_id);
    if let Some(event) = &report.migration {
        println!("migration applied: {}", event);
    }
    println!(
        "workload pid {} finished: {} after {:.3}s",
        report.pid,
        report.status,
        report.elapsed.as_secs_f64()
    );

    Ok(())
}
