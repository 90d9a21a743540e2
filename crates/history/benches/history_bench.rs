//! Benchmarks for the history store.
//!
//! Run with: cargo bench --package alopex-history
//!
//! ## Benchmark Categories
//!
//! - **Codec**: varint and interval encoding
//! - **Build**: state changes into each backend
//! - **Queries**: point, range and full-state queries on a closed history tree

use alopex_history::codec::{self, encode_checked};
use alopex_history::{Interval, Quark, StateSystem, StateValue, StoreConfig, Timestamp};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::TempDir;

const QUARKS: usize = 64;

/// Typical kernel-like trace: many attributes, one change per tick.
fn feed(ss: &StateSystem, ticks: Timestamp) -> Vec<Quark> {
    let quarks: Vec<Quark> = (0..QUARKS)
        .map(|i| ss.quark_for(&format!("Threads/{}/Status", i)).unwrap())
        .collect();
    for t in 1..=ticks {
        let quark = quarks[(t as usize * 13) % QUARKS];
        ss.modify_attribute(t, (t % 7) as i32, quark).unwrap();
    }
    quarks
}

fn bench_codec(c: &mut Criterion) {
    let values: Vec<i64> = (0..10_000).map(|i| i * 7_919 - 5_000_000).collect();
    c.bench_function("varint_encode_10k", |b| {
        let mut buf = Vec::with_capacity(10_000 * 9);
        b.iter(|| {
            buf.clear();
            for &v in &values {
                codec::write_varint(&mut buf, black_box(v)).unwrap();
            }
        })
    });

    let intervals: Vec<Interval> = (0..1_000)
        .map(|i| Interval::new(i * 10, i * 10 + 9, (i % 50) as i32, StateValue::from("running")).unwrap())
        .collect();
    c.bench_function("interval_encode_1k", |b| {
        let mut buf = Vec::new();
        b.iter(|| {
            buf.clear();
            for interval in &intervals {
                encode_checked(black_box(interval), &mut buf).unwrap();
            }
        })
    });
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");
    let ticks: Timestamp = 20_000;
    group.throughput(Throughput::Elements(ticks as u64));

    group.bench_function(BenchmarkId::new("in_memory", ticks), |b| {
        b.iter(|| {
            let ss = StateSystem::new(StoreConfig::in_memory("bench")).unwrap();
            feed(&ss, ticks);
            ss.close_history(ticks).unwrap();
        })
    });

    group.bench_function(BenchmarkId::new("history_tree", ticks), |b| {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("build.ht");
        b.iter(|| {
            let ss = StateSystem::new(StoreConfig::history_tree("bench", &path)).unwrap();
            feed(&ss, ticks);
            ss.close_history(ticks).unwrap();
        })
    });

    group.bench_function(BenchmarkId::new("null", ticks), |b| {
        b.iter(|| {
            let ss = StateSystem::new(StoreConfig::null("bench")).unwrap();
            feed(&ss, ticks);
            ss.close_history(ticks).unwrap();
        })
    });
    group.finish();
}

fn bench_queries(c: &mut Criterion) {
    let ticks: Timestamp = 100_000;
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("query.ht");
    let config = StoreConfig::history_tree("bench", &path).with_block_size(16 * 1024);
    {
        let ss = StateSystem::new(config.clone()).unwrap();
        feed(&ss, ticks);
        ss.close_history(ticks).unwrap();
    }
    let ss = StateSystem::open_existing(config).unwrap();
    let quarks: Vec<Quark> = ss.quarks("Threads/*/Status");

    c.bench_function("query_at_reopened", |b| {
        let mut t = 0;
        b.iter(|| {
            t = (t + 9_973) % ticks;
            ss.query_at(black_box(quarks[(t as usize) % quarks.len()]), t).unwrap()
        })
    });

    c.bench_function("query_range_1k", |b| {
        b.iter(|| ss.query_range(black_box(quarks[3]), 40_000, 41_000).unwrap())
    });

    c.bench_function("query_full_state", |b| {
        b.iter(|| ss.query_full_state(black_box(55_555)).unwrap())
    });

    c.bench_function("query_2d_discrete", |b| {
        b.iter(|| {
            ss.query_2d_at_times(black_box(&quarks[..8]), &[10_000, 50_000, 90_000])
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_codec, bench_build, bench_queries);
criterion_main!(benches);
