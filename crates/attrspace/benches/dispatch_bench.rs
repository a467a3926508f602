//! Dispatch benchmarks
//!
//! Measures the notify path with many subscribers.
//!
//! Run with: cargo bench --bench dispatch_bench

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use attrspace::subscription::CompiledPattern;
use attrspace::time::ManualClock;
use attrspace::{AttributeChange, AttributeSpace, AttributeSpaceConfig, ChangeEvent, PatternSpec};

fn make_space(subscribers: usize, batching: bool) -> AttributeSpace {
    let space = AttributeSpace::with_clock(
        AttributeSpaceConfig::default()
            .with_batching(batching)
            .with_logging(false),
        Arc::new(ManualClock::new()),
    )
    .unwrap();

    for i in 0..subscribers {
        let pattern = PatternSpec::new()
            .entity_type("Cliente")
            .attribute_name(format!("attr_{}", i % 16));
        space.subscribe(pattern, |n| {
            black_box(n.batch_count);
        })
        .unwrap();
    }
    space
}

fn change(i: usize) -> AttributeChange {
    AttributeChange::new(format!("attr_{}", i % 16), i as i64).with_entity("Cliente", "c1")
}

fn bench_notify_immediate(c: &mut Criterion) {
    let mut group = c.benchmark_group("notify_immediate");
    for subscribers in [1, 16, 256] {
        let space = make_space(subscribers, false);
        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &subscribers,
            |b, _| {
                let mut i = 0usize;
                b.iter(|| {
                    i += 1;
                    space.notify_change(black_box(change(i)));
                });
            },
        );
    }
    group.finish();
}

fn bench_notify_batched(c: &mut Criterion) {
    let space = make_space(256, true);
    c.bench_function("notify_batched_merge", |b| {
        let mut i = 0usize;
        b.iter(|| {
            i += 1;
            space.notify_change(black_box(change(i)));
        });
    });
}

fn bench_pattern_match(c: &mut Criterion) {
    let pattern: CompiledPattern = PatternSpec::new()
        .entity_type("Cliente")
        .attribute_name_pattern("indirizzo_*")
        .compile()
        .unwrap();
    let event: ChangeEvent = AttributeChange::new("indirizzo_citta", "Torino")
        .with_entity("Cliente", "c1")
        .into();

    c.bench_function("pattern_match_glob", |b| {
        b.iter(|| black_box(pattern.matches(black_box(&event))));
    });
}

criterion_group!(
    benches,
    bench_notify_immediate,
    bench_notify_batched,
    bench_pattern_match,
);
criterion_main!(benches);
