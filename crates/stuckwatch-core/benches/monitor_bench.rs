//! Criterion benchmarks for monitor hot paths.
//!
//! Covers: begin/end bracketing (the per-request cost), the disabled
//! pass-through, and sweeps over populated registries.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use stuckwatch_core::{
    Clock, ManualClock, Monitor, MonitorConfig, RecordingListener, StuckListener, WorkId,
};

fn monitor(stuck_secs: i64) -> (Arc<ManualClock>, Monitor) {
    let clock = Arc::new(ManualClock::new(0));
    let monitor = Monitor::builder(MonitorConfig {
        stuck_threshold_secs: stuck_secs,
        hogging_threshold_secs: 1,
        ..MonitorConfig::default()
    })
    .clock(Arc::clone(&clock) as Arc<dyn Clock>)
    .listener(Arc::new(RecordingListener::new()) as Arc<dyn StuckListener>)
    .build();
    (clock, monitor)
}

// ---------------------------------------------------------------------------
// Per-request cost
// ---------------------------------------------------------------------------

fn bench_begin_end(c: &mut Criterion) {
    let (_clock, enabled) = monitor(600);
    let mut id = 0u64;
    c.bench_function("begin_end_enabled", |b| {
        b.iter(|| {
            id = id.wrapping_add(1);
            let h = enabled.begin(black_box(WorkId(id)), "GET /bench");
            enabled.end(h);
        });
    });

    let (_clock, disabled) = monitor(0);
    c.bench_function("begin_end_disabled", |b| {
        b.iter(|| {
            let h = disabled.begin(black_box(WorkId(1)), "GET /bench");
            disabled.end(h);
        });
    });

    let (_clock, tracked) = monitor(600);
    c.bench_function("track_closure", |b| {
        b.iter(|| tracked.track(WorkId(7), "GET /bench", || black_box(1 + 1)));
    });
}

// ---------------------------------------------------------------------------
// Sweep cost
// ---------------------------------------------------------------------------

fn bench_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("sweep");
    for n in [100u64, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::new("quiet", n), &n, |b, &n| {
            let (_clock, m) = monitor(600);
            let _handles: Vec<_> = (0..n).map(|i| m.begin(WorkId(i), "/idle")).collect();
            b.iter(|| black_box(m.sweep()));
        });

        group.bench_with_input(BenchmarkId::new("all_stuck", n), &n, |b, &n| {
            let (clock, m) = monitor(2);
            let _handles: Vec<_> = (0..n).map(|i| m.begin(WorkId(i), "/wedged")).collect();
            clock.advance(5_000);
            m.sweep();
            // Steady state: everything already stuck, CAS fails fast.
            b.iter(|| black_box(m.sweep()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_begin_end, bench_sweep);
criterion_main!(benches);
