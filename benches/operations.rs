//! Benchmarks comparing the monopolizing and cooperative workload paths.
//!
//! Run with: cargo bench
//!
//! Both variants compute the same sums; the difference measured here is the
//! cost of the cooperative path's yield points and worker hand-off:
//! - `compute`: single pass vs. chunked pass with `yield_now` between chunks
//! - `derive_key`: inline PBKDF2 vs. PBKDF2 on the worker pool
//! - `bulk_serialize`: one pass vs. chunked build

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use looplag::{ChunkPlan, Cooperative, HarnessBuilder, HarnessRuntime, Monopolizing, ScratchFile};

fn create_runtime() -> HarnessRuntime {
    HarnessBuilder::new()
        .prefix("bench")
        .worker_threads(2)
        .build()
        .expect("failed to create runtime")
}

fn libraries(runtime: &HarnessRuntime) -> (Monopolizing, Cooperative) {
    let scratch = ScratchFile::new(std::env::temp_dir().join("looplag-bench"));
    (
        Monopolizing::new(scratch.clone()),
        Cooperative::new(scratch, ChunkPlan::default(), runtime.workers().clone(), 16),
    )
}

fn bench_compute(c: &mut Criterion) {
    let runtime = create_runtime();
    let (mono, coop) = libraries(&runtime);

    let mut group = c.benchmark_group("compute");
    group.sample_size(20);

    for limit in [10_000u64, 100_000, 1_000_000] {
        group.throughput(Throughput::Elements(limit));

        group.bench_with_input(BenchmarkId::new("monopolizing", limit), &limit, |b, &limit| {
            b.iter(|| black_box(mono.compute(limit)));
        });

        // Same depth as the monopolizing fixed fibonacci
        group.bench_with_input(BenchmarkId::new("cooperative", limit), &limit, |b, &limit| {
            b.iter(|| runtime.block_on(async { black_box(coop.compute(limit, 30).await) }));
        });
    }

    group.finish();
}

fn bench_derive_key(c: &mut Criterion) {
    let runtime = create_runtime();
    let (mono, coop) = libraries(&runtime);

    let mut group = c.benchmark_group("derive_key");
    group.sample_size(10);

    group.bench_function("monopolizing", |b| {
        b.iter(|| black_box(mono.derive_key(10_000)));
    });

    group.bench_function("cooperative", |b| {
        b.iter(|| runtime.block_on(async { black_box(coop.derive_key(10_000).await) }));
    });

    group.finish();
}

fn bench_bulk_serialize(c: &mut Criterion) {
    let runtime = create_runtime();
    let (mono, coop) = libraries(&runtime);

    let mut group = c.benchmark_group("bulk_serialize");
    group.sample_size(20);

    for size in [1_000u64, 10_000] {
        group.bench_with_input(BenchmarkId::new("monopolizing", size), &size, |b, &size| {
            b.iter(|| black_box(mono.bulk_serialize(size)));
        });

        group.bench_with_input(BenchmarkId::new("cooperative", size), &size, |b, &size| {
            b.iter(|| runtime.block_on(async { black_box(coop.bulk_serialize(size).await) }));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_compute, bench_derive_key, bench_bulk_serialize);
criterion_main!(benches);
