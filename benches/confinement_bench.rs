use coreshift::prelude::*;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_run_plan_build(c: &mut Criterion) {
    c.bench_function("run_plan_build", |b| {
        b.iter(|| {
            RunPlan::builder()
                .cgroup_name(black_box("bench0"))
                .cpuset(CoreSet::single(black_box(0)))
                .memory(MemoryLimit::Bytes(black_box(512 * 1024 * 1024)))
                .workload(["/bin/sleep", "1"])
                .build()
        })
    });
}

fn bench_limit_expressions(c: &mut Criterion) {
    c.bench_function("core_set_parse_list", |b| {
        b.iter(|| CoreSet::new(black_box("0-3,6,8-11")))
    });

    c.bench_function("memory_limit_parse", |b| {
        b.iter(|| MemoryLimit::parse(black_box("512M")))
    });
}

fn bench_clone_args_build(c: &mut Criterion) {
    c.bench_function("clone_args_build", |b| {
        b.iter(|| {
            CloneArgs::new()
                .exit_signal(black_box(libc::SIGCHLD))
                .cgroup_fd(black_box(3))
        })
    });
}

#[cfg(target_os = "linux")]
fn bench_cgroup_create_destroy(c: &mut Criterion) {
    c.bench_function("cgroup_create_destroy", |b| {
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            let name = format!("bench-{}", i);
            if let Ok(group) = CgroupManager::create(&name) {
                let _ = group.destroy();
            }
        })
    });
}

#[cfg(target_os = "linux")]
fn bench_cgroup_write_cpuset(c: &mut Criterion) {
    if let Ok(group) = CgroupManager::create("bench-cpuset-write") {
        let set = CoreSet::single(0);
        c.bench_function("cgroup_set_cpuset", |b| {
            b.iter(|| {
                let _ = group.set_cpuset(black_box(&set));
            })
        });
        let _ = group.destroy();
    }
}

#[cfg(not(target_os = "linux"))]
fn bench_cgroup_create_destroy(_c: &mut Criterion) {}

#[cfg(not(target_os = "linux"))]
fn bench_cgroup_write_cpuset(_c: &mut Criterion) {}

criterion_group!(
    benches,
    bench_run_plan_build,
    bench_limit_expressions,
    bench_clone_args_build,
    bench_cgroup_create_destroy,
    bench_cgroup_write_cpuset,
);
criterion_main!(benches);
