//! Registry benchmarks: presence churn and lookups.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use ferry_core::{ConnectionId, Registry};

fn populated(users: u64) -> Registry {
    let mut registry = Registry::new();
    for i in 0..users {
        registry.join(format!("user-{i}"), ConnectionId::new(i), format!("User {i}"));
    }
    registry
}

fn bench_join(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_join");

    for size in [10u64, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let mut registry = populated(size);
            let mut next = size;
            b.iter(|| {
                // Rejoin an existing user on a fresh connection
                let user = format!("user-{}", next % size);
                next += 1;
                black_box(registry.join(user, ConnectionId::new(next), "rejoined"));
            });
        });
    }

    group.finish();
}

fn bench_find(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_find");

    for size in [10u64, 100, 1000] {
        let registry = populated(size);
        let target = format!("user-{}", size - 1);
        group.bench_with_input(BenchmarkId::from_parameter(size), &target, |b, target| {
            b.iter(|| black_box(registry.find(target)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_join, bench_find);
criterion_main!(benches);
