//! Live Migration Demo
//!
//! Launches /bin/sleep atomically into a confined group on core 0, shifts
//! the group to core 1 half a second in, and supervises to completion.
//! Requires Linux 5.7+ with cgroup v2 and root privileges.
//!
//! ```bash
//! sudo cargo run --example migration_demo
//! ```

use coreshift::prelude::*;

fn main() {
    println!("=== coreshift Live Migration Demo ===\n");

    if !coreshift::clone3::is_clone3_available() {
        println!("clone3 is not available on this system (requires Linux 5.3+).");
        return;
    }

    let plan = RunPlan::builder()
        .cgroup_name("coreshift-demo")
        .cpuset(CoreSet::new("0").expect("valid core set"))
        .memory(MemoryLimit::parse("256M").expect("valid limit"))
        .workload(["/bin/sleep", "2"])
        .migrate_to(CoreSet::new("1").expect("valid core set"))
        .trigger(MigrationTrigger::After(std::time::Duration::from_millis(500)))
        .build()
        .expect("valid plan");

    match MigrationRunner::new(plan) {
        Ok(runner) => match runner.run() {
            Ok(report) => {
                println!("group {} (cgroup id {})", report.cgroup_name, report.cgroup_id);
                if let Some(event) = &report.migration {
                    println!("migration: {} (relocation is asynchronous)", event);
                }
                println!(
                    "workload pid {}: {} after {:.3}s",
                    report.pid,
                    report.status,
                    report.elapsed.as_secs_f64()
                );
            }
            Err(e) => println!("run failed: {}", e),
        },
        Err(e) => println!("setup failed (need root?): {}", e),
    }
}
