// Benchmarks for version-rule resolution
// Measures sorting and rule matching over growing candidate sets

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use farol_registry::version::{resolve, VersionCandidate, VersionRule};

fn candidates(count: usize) -> Vec<VersionCandidate> {
    (0..count)
        .map(|i| VersionCandidate {
            version: format!("{}.{}.{}", i / 100, (i / 10) % 10, i % 10),
            service_id: format!("service-{}", i),
            create_time: i as i64,
        })
        .collect()
}

fn bench_resolve_latest(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_latest");
    for size in [10usize, 100, 1000] {
        let set = candidates(size);
        let rule = VersionRule::parse("latest").unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(size), &set, |b, set| {
            b.iter(|| resolve(black_box(&rule), black_box(set)));
        });
    }
    group.finish();
}

fn bench_resolve_range(c: &mut Criterion) {
    let set = candidates(1000);
    let rule = VersionRule::parse("1.0.0-5.0.0").unwrap();
    c.bench_function("resolve_range_1000", |b| {
        b.iter(|| resolve(black_box(&rule), black_box(&set)));
    });
}

criterion_group!(benches, bench_resolve_latest, bench_resolve_range);
criterion_main!(benches);
