//! Direct Cgroup v2 Control Demo
//!
//! Demonstrates group creation, limit expressions, identity lookup, and
//! teardown. Requires Linux with cgroup v2 and root privileges.
//!
//! ```bash
//! sudo cargo run --example cgroup_control
//! ```

use coreshift::prelude::*;

fn main() {
    println!("=== coreshift Cgroup Control Demo ===\n");

    #[cfg(target_os = "linux")]
    linux_demo();

    #[cfg(not(target_os = "linux"))]
    println!("This example requires Linux with cgroup v2.\n\
              Showing API overview instead:\n\n\
              // Create group (idempotent)\n\
              let group = CgroupManager::create(\"bench0\")?;\n\n\
              // Confine to core 0\n\
              group.set_cpuset(&CoreSet::new(\"0\")?)?;\n\n\
              // Memory ceiling: 512M\n\
              group.set_memory(&MemoryLimit::parse(\"512M\")?)?;\n\n\
              // Kernel identity for telemetry correlation\n\
              println!(\"cgroup id: {{}}\", group.inode()?);\n\n\
              // Cleanup\n\
              group.destroy()?;");
}

#[cfg(target_os = "linux")]
fn linux_demo() {
    match CgroupManager::create("coreshift-example") {
        Ok(group) => {
            println!("Created group: {}", group.path().display());

            let cores = CoreSet::new("0").expect("valid core set");
            if let Err(e) = group.set_cpuset(&cores) {
                println!("Set cpuset: {}", e);
            } else {
                println!("CPU set: {}", cores);
            }

            let limit = MemoryLimit::parse("512M").expect("valid limit");
            if let Err(e) = group.set_memory(&limit) {
                println!("Set memory: {}", e);
            } else {
                println!("Memory ceiling: {} bytes", limit);
            }

            match group.cpuset() {
                Ok(readback) => println!("cpuset.cpus reads back: {:?}", readback),
                Err(e) => println!("Read cpuset: {}", e),
            }

            match group.inode() {
                Ok(id) => println!("Cgroup id (inode): {}", id),
                Err(e) => println!("Identity lookup: {}", e),
            }

            if let Err(e) = group.destroy() {
                println!("Cleanup: {}", e);
            } else {
                println!("\nGroup destroyed successfully.");
            }
        }
        Err(e) => {
            println!("Failed to create group (need root?): {}", e);
        }
    }
}
