//! Lock-free counters for the monitor's own activity.
//!
//! Recording is O(1) with relaxed atomics. The sweep is the only writer for
//! most of these, but readers on other threads may snapshot at any time.

use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

// ---------------------------------------------------------------------------
// Primitives
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct Counter {
    v: AtomicU64,
}

impl Counter {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            v: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn inc(&self) {
        self.v.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(&self, delta: u64) {
        self.v.fetch_add(delta, Ordering::Relaxed);
    }

    #[inline]
    pub fn load(&self) -> u64 {
        self.v.load(Ordering::Relaxed)
    }
}

/// Signed gauge. Used for the live hogging/stuck counts, which the blanket
/// reconcile policy may drive below zero.
#[derive(Debug, Default)]
pub struct GaugeI64 {
    v: AtomicI64,
}

impl GaugeI64 {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            v: AtomicI64::new(0),
        }
    }

    /// Add `delta` and return the new value.
    #[inline]
    pub fn add(&self, delta: i64) -> i64 {
        self.v.fetch_add(delta, Ordering::AcqRel) + delta
    }

    #[inline]
    pub fn set(&self, value: i64) {
        self.v.store(value, Ordering::Release);
    }

    #[inline]
    pub fn load(&self) -> i64 {
        self.v.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Latency summary
// ---------------------------------------------------------------------------

/// Summary of a duration sampled once per sweep.
#[derive(Debug)]
pub struct LatencySummary {
    count: AtomicU64,
    total: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
    last: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LatencySnapshot {
    pub count: u64,
    pub total: u64,
    pub min: u64,
    pub max: u64,
    pub mean: u64,
    pub last: u64,
}

impl Default for LatencySummary {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencySummary {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            total: AtomicU64::new(0),
            min: AtomicU64::new(u64::MAX),
            max: AtomicU64::new(0),
            last: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record(&self, value: u64) {
        self.total.fetch_add(value, Ordering::Relaxed);
        self.min.fetch_min(value, Ordering::Relaxed);
        self.max.fetch_max(value, Ordering::Relaxed);
        self.last.store(value, Ordering::Relaxed);
        // Release pairs with the Acquire load in snapshot().
        self.count.fetch_add(1, Ordering::Release);
    }

    #[must_use]
    pub fn snapshot(&self) -> LatencySnapshot {
        let count = self.count.load(Ordering::Acquire);
        if count == 0 {
            return LatencySnapshot::default();
        }
        let total = self.total.load(Ordering::Relaxed);
        let max = self.max.load(Ordering::Relaxed);
        LatencySnapshot {
            count,
            total,
            min: self.min.load(Ordering::Relaxed).min(max),
            max,
            mean: total / count,
            last: self.last.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Monitor metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MonitorMetrics {
    /// `begin` calls that created a record.
    pub begin_total: Counter,
    /// `begin` calls short-circuited because monitoring was disabled.
    pub bypassed_total: Counter,
    pub sweeps_total: Counter,
    /// Sweeps refused because another sweep was in flight.
    pub sweeps_skipped_total: Counter,
    pub hogging_promotions_total: Counter,
    pub stuck_detected_total: Counter,
    pub resolved_total: Counter,
    pub notify_failures_total: Counter,
    /// Records examined by the most recent sweep.
    pub last_sweep_scanned: GaugeI64,
    pub sweep_latency_us: LatencySummary,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MonitorMetricsSnapshot {
    pub begin_total: u64,
    pub bypassed_total: u64,
    pub sweeps_total: u64,
    pub sweeps_skipped_total: u64,
    pub hogging_promotions_total: u64,
    pub stuck_detected_total: u64,
    pub resolved_total: u64,
    pub notify_failures_total: u64,
    pub last_sweep_scanned: i64,
    pub sweep_latency_us: LatencySnapshot,
}

impl MonitorMetrics {
    #[must_use]
    pub fn snapshot(&self) -> MonitorMetricsSnapshot {
        MonitorMetricsSnapshot {
            begin_total: self.begin_total.load(),
            bypassed_total: self.bypassed_total.load(),
            sweeps_total: self.sweeps_total.load(),
            sweeps_skipped_total: self.sweeps_skipped_total.load(),
            hogging_promotions_total: self.hogging_promotions_total.load(),
            stuck_detected_total: self.stuck_detected_total.load(),
            resolved_total: self.resolved_total.load(),
            notify_failures_total: self.notify_failures_total.load(),
            last_sweep_scanned: self.last_sweep_scanned.load(),
            sweep_latency_us: self.sweep_latency_us.snapshot(),
        }
    }
}
