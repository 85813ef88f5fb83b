//! The monitoring engine.
//!
//! Worker threads bracket each unit of work with [`Monitor::begin`] and
//! [`Monitor::end`] (or the [`WorkGuard`] / [`Monitor::track`] wrappers, which
//! run `end` on unwind). A periodic [`Monitor::sweep`] promotes long-running
//! entries and reconciles flagged completions.
//!
//! # Counter ownership
//!
//! Only the sweep mutates the live hogging/stuck counters. Workers never
//! touch them: a worker that ends flagged work pushes a report onto the
//! completion queue, and the next sweep reconciles it. That single-writer
//! rule is what keeps the counts exact under arbitrary interleavings.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

use crate::clock::{Clock, SystemClock, millis_to_utc};
use crate::completion::{CompletedFlagged, CompletionQueue};
use crate::config::{MonitorConfig, ReconcilePolicy};
use crate::metrics::{GaugeI64, MonitorMetrics, MonitorMetricsSnapshot};
use crate::notify::{StuckDetected, StuckListener, StuckResolved, TracingListener, deliver};
use crate::record::{WorkId, WorkRecord, WorkState};
use crate::registry::ActiveRegistry;
use crate::report::MonitorReport;

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Returned by [`Monitor::begin`]; pass it to [`Monitor::end`].
///
/// Consumed by `end`, so a handle cannot be ended twice. A handle created
/// while monitoring was disabled carries no record and ends as a no-op.
/// Ending a handle on a monitor other than the one that began it is ignored.
#[derive(Debug)]
#[must_use = "a WorkHandle must be passed to Monitor::end"]
pub struct WorkHandle {
    monitor_id: u64,
    record: Option<Arc<WorkRecord>>,
}

impl WorkHandle {
    const fn untracked(monitor_id: u64) -> Self {
        Self {
            monitor_id,
            record: None,
        }
    }

    /// Whether `begin` registered this work.
    #[must_use]
    pub const fn is_tracked(&self) -> bool {
        self.record.is_some()
    }

    #[must_use]
    pub fn record(&self) -> Option<&WorkRecord> {
        self.record.as_deref()
    }

    #[must_use]
    pub fn state(&self) -> Option<WorkState> {
        self.record.as_ref().map(|r| r.state())
    }
}

/// Ends its work when dropped, including during a panic unwind.
#[derive(Debug)]
#[must_use = "dropping a WorkGuard immediately ends the work"]
pub struct WorkGuard<'a> {
    monitor: &'a Monitor,
    handle: Option<WorkHandle>,
}

impl WorkGuard<'_> {
    #[must_use]
    pub fn handle(&self) -> Option<&WorkHandle> {
        self.handle.as_ref()
    }
}

impl Drop for WorkGuard<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.monitor.end(handle);
        }
    }
}

// ---------------------------------------------------------------------------
// Sweep results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub scanned: u64,
    pub promoted_hogging: u64,
    pub promoted_stuck: u64,
    pub reconciled: u64,
    pub notify_failures: u64,
    /// Promotions were skipped because monitoring is disabled.
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SweepOutcome {
    Completed(SweepSummary),
    /// Another sweep was already in flight.
    Skipped,
}

impl SweepOutcome {
    #[must_use]
    pub const fn summary(&self) -> Option<&SweepSummary> {
        match self {
            Self::Completed(s) => Some(s),
            Self::Skipped => None,
        }
    }
}

/// Clears the in-flight flag even if a sweep step panics.
struct SweepSlot<'a>(&'a AtomicBool);

impl<'a> SweepSlot<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SweepSlot<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[inline]
fn threshold_millis(secs: i64) -> u64 {
    u64::try_from(secs).unwrap_or(0).saturating_mul(1_000)
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

static NEXT_MONITOR_ID: AtomicU64 = AtomicU64::new(1);

pub struct Monitor {
    id: u64,
    stuck_threshold_secs: AtomicI64,
    hogging_threshold_secs: AtomicI64,
    capture_origin_backtrace: AtomicBool,
    reconcile_policy: ReconcilePolicy,
    registry: ActiveRegistry,
    completions: CompletionQueue,
    stuck_count: GaugeI64,
    hogging_count: GaugeI64,
    sweeping: AtomicBool,
    sweeper_attached: AtomicBool,
    listener: Arc<dyn StuckListener>,
    clock: Arc<dyn Clock>,
    metrics: MonitorMetrics,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("id", &self.id)
            .field("stuck_threshold_secs", &self.stuck_threshold())
            .field("hogging_threshold_secs", &self.hogging_threshold())
            .field("reconcile_policy", &self.reconcile_policy)
            .field("active", &self.registry.len())
            .field("hogging_count", &self.hogging_count.load())
            .field("stuck_count", &self.stuck_count.load())
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Monitor`]. Defaults: [`TracingListener`], [`SystemClock`].
pub struct MonitorBuilder {
    config: MonitorConfig,
    listener: Arc<dyn StuckListener>,
    clock: Arc<dyn Clock>,
}

impl MonitorBuilder {
    #[must_use]
    pub fn listener(mut self, listener: Arc<dyn StuckListener>) -> Self {
        self.listener = listener;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn build(self) -> Monitor {
        let MonitorConfig {
            stuck_threshold_secs,
            hogging_threshold_secs,
            capture_origin_backtrace,
            reconcile_policy,
            ..
        } = self.config;
        Monitor {
            id: NEXT_MONITOR_ID.fetch_add(1, Ordering::Relaxed),
            stuck_threshold_secs: AtomicI64::new(stuck_threshold_secs),
            hogging_threshold_secs: AtomicI64::new(hogging_threshold_secs),
            capture_origin_backtrace: AtomicBool::new(capture_origin_backtrace),
            reconcile_policy,
            registry: ActiveRegistry::new(),
            completions: CompletionQueue::new(),
            stuck_count: GaugeI64::new(),
            hogging_count: GaugeI64::new(),
            sweeping: AtomicBool::new(false),
            sweeper_attached: AtomicBool::new(false),
            listener: self.listener,
            clock: self.clock,
            metrics: MonitorMetrics::default(),
        }
    }
}

impl Monitor {
    #[must_use]
    pub fn builder(config: MonitorConfig) -> MonitorBuilder {
        MonitorBuilder {
            config,
            listener: Arc::new(TracingListener),
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn new(config: MonitorConfig) -> Self {
        Self::builder(config).build()
    }

    // -- begin / end --------------------------------------------------------

    /// Register the start of a unit of work.
    ///
    /// When monitoring is disabled this does nothing and returns an untracked
    /// handle; the descriptor is not even converted.
    pub fn begin(&self, id: WorkId, descriptor: impl Into<String>) -> WorkHandle {
        if !self.is_enabled() {
            self.metrics.bypassed_total.inc();
            return WorkHandle::untracked(self.id);
        }

        let mut record = WorkRecord::new(id, descriptor, self.clock.as_ref());
        if self.capture_origin_backtrace.load(Ordering::Relaxed) {
            record = record.with_origin_backtrace();
        }
        let record = Arc::new(record);
        self.registry.put(Arc::clone(&record));
        self.metrics.begin_total.inc();
        tracing::debug!(work_id = %id, "active work registered");

        WorkHandle {
            monitor_id: self.id,
            record: Some(record),
        }
    }

    /// Register the end of a unit of work. Must run even if the work failed.
    ///
    /// Runs for tracked handles regardless of the current enabled flag, so
    /// work begun before monitoring was switched off still leaves the
    /// registry. A handle begun on another monitor is logged and dropped
    /// without touching either monitor.
    pub fn end(&self, handle: WorkHandle) {
        let Some(record) = handle.record else {
            return;
        };
        if handle.monitor_id != self.id {
            tracing::warn!(
                work_id = %record.id(),
                monitor_id = self.id,
                handle_monitor_id = handle.monitor_id,
                "handle ended on a monitor that did not begin it; ignoring"
            );
            return;
        }

        if self.registry.remove_exact(&record) {
            tracing::debug!(work_id = %record.id(), "active work removed");
        } else {
            tracing::debug!(work_id = %record.id(), "active entry already gone or replaced");
        }

        let prior = record.mark_done();
        if prior.is_flagged() {
            self.completions.push(CompletedFlagged {
                id: record.id(),
                descriptor: record.descriptor().to_owned(),
                total_active_time_ms: record.elapsed_millis(self.clock.as_ref()),
                prior_state: prior,
            });
            tracing::debug!(work_id = %record.id(), prior_state = %prior, "flagged completion queued");
        }
    }

    /// `begin` now, `end` when the returned guard drops.
    pub fn guard(&self, id: WorkId, descriptor: impl Into<String>) -> WorkGuard<'_> {
        WorkGuard {
            monitor: self,
            handle: Some(self.begin(id, descriptor)),
        }
    }

    /// Run `work` bracketed by `begin`/`end`. `end` runs on panic too.
    pub fn track<T>(&self, id: WorkId, descriptor: impl Into<String>, work: impl FnOnce() -> T) -> T {
        let _guard = self.guard(id, descriptor);
        work()
    }

    // -- sweep --------------------------------------------------------------

    /// Promote long-running work and reconcile flagged completions.
    ///
    /// Thresholds are read once at the start. Overlapping calls are refused
    /// with [`SweepOutcome::Skipped`]. When monitoring is disabled no
    /// promotions happen, but queued completions are still reconciled.
    pub fn sweep(&self) -> SweepOutcome {
        let Some(_slot) = SweepSlot::acquire(&self.sweeping) else {
            self.metrics.sweeps_skipped_total.inc();
            tracing::debug!("sweep already in flight; skipping");
            return SweepOutcome::Skipped;
        };

        let started = Instant::now();
        let stuck_secs = self.stuck_threshold();
        let hogging_ms = threshold_millis(self.hogging_threshold());
        let stuck_ms = threshold_millis(stuck_secs);
        let mut summary = SweepSummary {
            disabled: stuck_secs <= 0,
            ..SweepSummary::default()
        };

        tracing::debug!(hogging_ms, stuck_ms, "sweep start");

        if !summary.disabled {
            for record in self.registry.snapshot() {
                summary.scanned += 1;
                self.evaluate(&record, hogging_ms, stuck_ms, stuck_secs, &mut summary);
            }
        }

        for completed in self.completions.drain() {
            self.reconcile(completed, &mut summary);
        }

        self.metrics.sweeps_total.inc();
        self.metrics
            .last_sweep_scanned
            .set(i64::try_from(summary.scanned).unwrap_or(i64::MAX));
        self.metrics
            .sweep_latency_us
            .record(u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX));

        tracing::debug!(
            scanned = summary.scanned,
            promoted_hogging = summary.promoted_hogging,
            promoted_stuck = summary.promoted_stuck,
            reconciled = summary.reconciled,
            "sweep end"
        );
        SweepOutcome::Completed(summary)
    }

    fn evaluate(
        &self,
        record: &WorkRecord,
        hogging_ms: u64,
        stuck_ms: u64,
        stuck_secs: i64,
        summary: &mut SweepSummary,
    ) {
        let elapsed = record.elapsed_millis(self.clock.as_ref());

        if elapsed >= hogging_ms && record.promote_to_hogging() {
            self.hogging_count.add(1);
            self.metrics.hogging_promotions_total.inc();
            summary.promoted_hogging += 1;
            tracing::debug!(work_id = %record.id(), elapsed_ms = elapsed, "work hogging");
        }

        if elapsed >= stuck_ms && record.promote_to_stuck() {
            if self.reconcile_policy == ReconcilePolicy::Exact {
                self.hogging_count.add(-1);
            }
            let stuck_count = self.stuck_count.add(1);
            self.metrics.stuck_detected_total.inc();
            summary.promoted_stuck += 1;

            let event = StuckDetected {
                id: record.id(),
                descriptor: record.descriptor().to_owned(),
                active_time_ms: elapsed,
                started_at: record.started_at(),
                stuck_count,
                stuck_threshold_secs: stuck_secs,
                stack_trace: record.stack_trace(),
            };
            if !deliver("stuck_detected", || self.listener.on_stuck_detected(&event)) {
                self.metrics.notify_failures_total.inc();
                summary.notify_failures += 1;
            }
        }
    }

    fn reconcile(&self, completed: CompletedFlagged, summary: &mut SweepSummary) {
        let stuck_count = match (self.reconcile_policy, completed.prior_state) {
            (ReconcilePolicy::Blanket, _) => {
                self.hogging_count.add(-1);
                self.stuck_count.add(-1)
            }
            (ReconcilePolicy::Exact, WorkState::Stuck) => self.stuck_count.add(-1),
            (ReconcilePolicy::Exact, _) => {
                self.hogging_count.add(-1);
                self.stuck_count.load()
            }
        };
        self.metrics.resolved_total.inc();
        summary.reconciled += 1;

        let event = StuckResolved {
            id: completed.id,
            descriptor: completed.descriptor,
            total_active_time_ms: completed.total_active_time_ms,
            stuck_count,
            prior_state: completed.prior_state,
        };
        if !deliver("stuck_resolved", || self.listener.on_stuck_resolved(&event)) {
            self.metrics.notify_failures_total.inc();
            summary.notify_failures += 1;
        }
    }

    /// Reserve the single background sweeper slot.
    pub(crate) fn attach_sweeper(&self) -> bool {
        self.sweeper_attached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn detach_sweeper(&self) {
        self.sweeper_attached.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn has_sweeper(&self) -> bool {
        self.sweeper_attached.load(Ordering::Acquire)
    }

    // -- queries ------------------------------------------------------------

    /// Ids of currently stuck work, scanned live.
    #[must_use]
    pub fn stuck_thread_ids(&self) -> Vec<WorkId> {
        self.registry.ids_in_state(WorkState::Stuck)
    }

    /// Ids of currently hogging (not yet stuck) work, scanned live.
    #[must_use]
    pub fn hogging_thread_ids(&self) -> Vec<WorkId> {
        self.registry.ids_in_state(WorkState::Hogging)
    }

    #[must_use]
    pub fn stuck_thread_count(&self) -> i64 {
        self.stuck_count.load()
    }

    #[must_use]
    pub fn hogging_thread_count(&self) -> i64 {
        self.hogging_count.load()
    }

    #[must_use]
    pub fn active_thread_count(&self) -> usize {
        self.registry.len()
    }

    /// Flagged completions waiting for the next sweep.
    #[must_use]
    pub fn pending_completions(&self) -> usize {
        self.completions.len()
    }

    // -- configuration ------------------------------------------------------

    #[must_use]
    pub fn stuck_threshold(&self) -> i64 {
        self.stuck_threshold_secs.load(Ordering::Relaxed)
    }

    /// Seconds; `<= 0` disables monitoring. Applies from the next `begin`/sweep.
    pub fn set_stuck_threshold(&self, secs: i64) {
        let prev = self.stuck_threshold_secs.swap(secs, Ordering::Relaxed);
        if prev != secs {
            tracing::info!(from = prev, to = secs, "stuck threshold changed");
        }
    }

    #[must_use]
    pub fn hogging_threshold(&self) -> i64 {
        self.hogging_threshold_secs.load(Ordering::Relaxed)
    }

    pub fn set_hogging_threshold(&self, secs: i64) {
        let prev = self.hogging_threshold_secs.swap(secs, Ordering::Relaxed);
        if prev != secs {
            tracing::info!(from = prev, to = secs, "hogging threshold changed");
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.stuck_threshold() > 0
    }

    /// Capture a `begin`-site backtrace for records created from now on.
    pub fn set_capture_origin_backtrace(&self, enabled: bool) {
        self.capture_origin_backtrace.store(enabled, Ordering::Relaxed);
    }

    #[must_use]
    pub const fn reconcile_policy(&self) -> ReconcilePolicy {
        self.reconcile_policy
    }

    #[must_use]
    pub fn metrics(&self) -> MonitorMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Management view of the monitor's current state.
    #[must_use]
    pub fn report(&self) -> MonitorReport {
        MonitorReport {
            generated_at: millis_to_utc(self.clock.now_millis()),
            enabled: self.is_enabled(),
            stuck_threshold_secs: self.stuck_threshold(),
            hogging_threshold_secs: self.hogging_threshold(),
            reconcile_policy: self.reconcile_policy,
            active_count: self.active_thread_count(),
            hogging_count: self.hogging_thread_count(),
            stuck_count: self.stuck_thread_count(),
            stuck_ids: self.stuck_thread_ids(),
            pending_completions: self.pending_completions(),
            metrics: self.metrics(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::notify::RecordingListener;

    struct Harness {
        clock: Arc<ManualClock>,
        listener: Arc<RecordingListener>,
        monitor: Monitor,
    }

    fn harness(hogging_secs: i64, stuck_secs: i64, policy: ReconcilePolicy) -> Harness {
        let clock = Arc::new(ManualClock::new(0));
        let listener = Arc::new(RecordingListener::new());
        let monitor = Monitor::builder(MonitorConfig {
            stuck_threshold_secs: stuck_secs,
            hogging_threshold_secs: hogging_secs,
            reconcile_policy: policy,
            ..MonitorConfig::default()
        })
        .clock(Arc::clone(&clock) as Arc<dyn Clock>)
        .listener(Arc::clone(&listener) as Arc<dyn StuckListener>)
        .build();
        Harness {
            clock,
            listener,
            monitor,
        }
    }

    fn summary(outcome: SweepOutcome) -> SweepSummary {
        outcome.summary().cloned().expect("sweep should complete")
    }

    #[test]
    fn begin_end_tracks_active_count() {
        let h = harness(1, 3, ReconcilePolicy::Exact);
        let a = h.monitor.begin(WorkId(1), "/a");
        let b = h.monitor.begin(WorkId(2), "/b");
        assert!(a.is_tracked());
        assert_eq!(h.monitor.active_thread_count(), 2);
        h.monitor.end(a);
        assert_eq!(h.monitor.active_thread_count(), 1);
        h.monitor.end(b);
        assert_eq!(h.monitor.active_thread_count(), 0);
        assert_eq!(h.monitor.pending_completions(), 0);
    }

    #[test]
    fn full_timeline_detects_and_resolves_once() {
        let h = harness(1, 3, ReconcilePolicy::Exact);
        let a = h.monitor.begin(WorkId(1), "/reports/slow");

        h.clock.set(1_500);
        let s = summary(h.monitor.sweep());
        assert_eq!(s.promoted_hogging, 1);
        assert_eq!(h.monitor.hogging_thread_count(), 1);
        assert_eq!(h.monitor.stuck_thread_count(), 0);

        h.clock.set(3_500);
        let s = summary(h.monitor.sweep());
        assert_eq!(s.promoted_stuck, 1);
        assert_eq!(h.monitor.stuck_thread_count(), 1);
        assert_eq!(h.monitor.hogging_thread_count(), 0);
        assert_eq!(h.monitor.stuck_thread_ids(), vec![WorkId(1)]);
        let detected = h.listener.detected();
        assert_eq!(detected.len(), 1);
        assert_eq!(detected[0].active_time_ms, 3_500);
        assert_eq!(detected[0].stuck_count, 1);
        assert_eq!(detected[0].stuck_threshold_secs, 3);

        h.clock.set(4_000);
        h.monitor.end(a);
        assert_eq!(h.monitor.active_thread_count(), 0);
        assert_eq!(h.monitor.pending_completions(), 1);

        h.clock.set(5_000);
        let s = summary(h.monitor.sweep());
        assert_eq!(s.reconciled, 1);
        let resolved = h.listener.resolved();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].total_active_time_ms, 4_000);
        assert_eq!(resolved[0].stuck_count, 0);
        assert_eq!(resolved[0].prior_state, WorkState::Stuck);
        assert_eq!(h.monitor.stuck_thread_count(), 0);
        assert_eq!(h.monitor.hogging_thread_count(), 0);

        h.clock.set(9_000);
        h.monitor.sweep();
        assert_eq!(h.listener.events().len(), 2);
    }

    #[test]
    fn repeated_sweeps_do_not_double_count() {
        let h = harness(1, 3, ReconcilePolicy::Exact);
        let _a = h.monitor.begin(WorkId(1), "/a");
        h.clock.set(2_000);
        h.monitor.sweep();
        h.monitor.sweep();
        assert_eq!(h.monitor.hogging_thread_count(), 1);
        h.clock.set(4_000);
        h.monitor.sweep();
        h.monitor.sweep();
        assert_eq!(h.monitor.stuck_thread_count(), 1);
        assert_eq!(h.listener.detected().len(), 1);
    }

    #[test]
    fn first_sweep_past_both_thresholds_passes_through_hogging() {
        let h = harness(1, 3, ReconcilePolicy::Exact);
        let _a = h.monitor.begin(WorkId(1), "/a");
        h.clock.set(10_000);
        let s = summary(h.monitor.sweep());
        assert_eq!(s.promoted_hogging, 1);
        assert_eq!(s.promoted_stuck, 1);
        assert_eq!(h.monitor.stuck_thread_count(), 1);
        assert_eq!(h.monitor.metrics().hogging_promotions_total, 1);
    }

    #[test]
    fn stuck_threshold_below_hogging_waits_for_hogging() {
        let h = harness(10, 2, ReconcilePolicy::Exact);
        let _a = h.monitor.begin(WorkId(1), "/a");
        h.clock.set(5_000);
        h.monitor.sweep();
        assert_eq!(h.monitor.stuck_thread_count(), 0);
        assert_eq!(h.monitor.hogging_thread_count(), 0);
        h.clock.set(11_000);
        h.monitor.sweep();
        // Hogging now, and stuck in the same pass since 11s >= 2s.
        assert_eq!(h.monitor.stuck_thread_count(), 1);
    }

    #[test]
    fn hogging_only_completion_leaves_stuck_count_untouched() {
        let h = harness(1, 60, ReconcilePolicy::Exact);
        let a = h.monitor.begin(WorkId(1), "/a");
        h.clock.set(2_000);
        h.monitor.sweep();
        h.monitor.end(a);
        h.monitor.sweep();
        assert_eq!(h.monitor.hogging_thread_count(), 0);
        assert_eq!(h.monitor.stuck_thread_count(), 0);
        let resolved = h.listener.resolved();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].prior_state, WorkState::Hogging);
    }

    #[test]
    fn blanket_policy_decrements_both_counters() {
        let h = harness(1, 60, ReconcilePolicy::Blanket);
        let a = h.monitor.begin(WorkId(1), "/a");
        h.clock.set(2_000);
        h.monitor.sweep();
        h.monitor.end(a);
        h.monitor.sweep();
        assert_eq!(h.monitor.hogging_thread_count(), 0);
        assert_eq!(h.monitor.stuck_thread_count(), -1);
        assert_eq!(h.listener.resolved()[0].stuck_count, -1);
    }

    #[test]
    fn blanket_policy_keeps_hogging_count_through_stuck() {
        let h = harness(1, 3, ReconcilePolicy::Blanket);
        let a = h.monitor.begin(WorkId(1), "/a");
        h.clock.set(4_000);
        h.monitor.sweep();
        assert_eq!(h.monitor.hogging_thread_count(), 1);
        assert_eq!(h.monitor.stuck_thread_count(), 1);
        h.monitor.end(a);
        h.monitor.sweep();
        assert_eq!(h.monitor.hogging_thread_count(), 0);
        assert_eq!(h.monitor.stuck_thread_count(), 0);
    }

    #[test]
    fn disabled_monitor_is_pass_through() {
        let h = harness(1, 0, ReconcilePolicy::Exact);
        let a = h.monitor.begin(WorkId(1), "/a");
        assert!(!a.is_tracked());
        assert_eq!(h.monitor.active_thread_count(), 0);
        h.clock.set(1_000_000);
        let s = summary(h.monitor.sweep());
        assert!(s.disabled);
        h.monitor.end(a);
        assert!(h.listener.events().is_empty());
        assert_eq!(h.monitor.metrics().bypassed_total, 1);
    }

    #[test]
    fn disabling_mid_flight_still_cleans_up_and_reconciles() {
        let h = harness(1, 3, ReconcilePolicy::Exact);
        let a = h.monitor.begin(WorkId(1), "/a");
        h.clock.set(4_000);
        h.monitor.sweep();
        assert_eq!(h.monitor.stuck_thread_count(), 1);

        h.monitor.set_stuck_threshold(0);
        let b = h.monitor.begin(WorkId(2), "/b");
        assert!(!b.is_tracked());
        h.monitor.end(a);
        h.monitor.end(b);
        assert_eq!(h.monitor.active_thread_count(), 0);

        h.monitor.sweep();
        assert_eq!(h.monitor.stuck_thread_count(), 0);
        assert_eq!(h.listener.resolved().len(), 1);
    }

    #[test]
    fn two_stuck_records_report_running_count() {
        let h = harness(1, 3, ReconcilePolicy::Exact);
        let _x = h.monitor.begin(WorkId(10), "/x");
        let _y = h.monitor.begin(WorkId(20), "/y");
        h.clock.set(5_000);
        h.monitor.sweep();
        let mut counts: Vec<i64> = h.listener.detected().iter().map(|d| d.stuck_count).collect();
        counts.sort_unstable();
        assert_eq!(counts, vec![1, 2]);
        assert_eq!(h.monitor.stuck_thread_ids(), vec![WorkId(10), WorkId(20)]);
    }

    #[test]
    fn guard_ends_work_on_panic() {
        let h = harness(1, 3, ReconcilePolicy::Exact);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            h.monitor.track(WorkId(1), "/boom", || {
                assert_eq!(h.monitor.active_thread_count(), 1);
                panic!("handler failed");
            })
        }));
        assert!(result.is_err());
        assert_eq!(h.monitor.active_thread_count(), 0);
    }

    #[test]
    fn track_returns_closure_value() {
        let h = harness(1, 3, ReconcilePolicy::Exact);
        let v = h.monitor.track(WorkId(1), "/ok", || 42);
        assert_eq!(v, 42);
        assert_eq!(h.monitor.active_thread_count(), 0);
    }

    #[test]
    fn stale_handle_does_not_evict_reused_id() {
        let h = harness(1, 3, ReconcilePolicy::Exact);
        let old = h.monitor.begin(WorkId(1), "/old");
        let new = h.monitor.begin(WorkId(1), "/new");
        assert_eq!(h.monitor.active_thread_count(), 1);
        h.monitor.end(old);
        assert_eq!(h.monitor.active_thread_count(), 1);
        h.monitor.end(new);
        assert_eq!(h.monitor.active_thread_count(), 0);
    }

    #[test]
    fn handle_from_another_monitor_is_ignored() {
        let a = harness(1, 3, ReconcilePolicy::Exact);
        let b = harness(1, 3, ReconcilePolicy::Exact);
        let handle = b.monitor.begin(WorkId(1), "/b");
        b.clock.set(2_000);
        b.monitor.sweep();
        assert_eq!(b.monitor.hogging_thread_count(), 1);

        a.monitor.end(handle);
        a.monitor.sweep();
        b.monitor.sweep();
        assert_eq!(a.monitor.hogging_thread_count(), 0);
        assert_eq!(a.monitor.stuck_thread_count(), 0);
        assert_eq!(a.monitor.active_thread_count(), 0);
        assert_eq!(a.monitor.metrics().resolved_total, 0);
        assert!(a.listener.resolved().is_empty());
        assert_eq!(b.monitor.hogging_thread_count(), 1);
        assert_eq!(b.monitor.active_thread_count(), 1);
        assert_eq!(b.monitor.registry.snapshot()[0].state(), WorkState::Hogging);
    }

    #[test]
    fn overlapping_sweep_is_skipped() {
        let h = harness(1, 3, ReconcilePolicy::Exact);
        let slot = SweepSlot::acquire(&h.monitor.sweeping).unwrap();
        assert_eq!(h.monitor.sweep(), SweepOutcome::Skipped);
        drop(slot);
        assert!(h.monitor.sweep().summary().is_some());
        assert_eq!(h.monitor.metrics().sweeps_skipped_total, 1);
    }

    #[test]
    fn threshold_setters_apply_on_next_sweep() {
        let h = harness(100, 300, ReconcilePolicy::Exact);
        let _a = h.monitor.begin(WorkId(1), "/a");
        h.clock.set(5_000);
        h.monitor.sweep();
        assert_eq!(h.monitor.hogging_thread_count(), 0);
        h.monitor.set_hogging_threshold(1);
        h.monitor.set_stuck_threshold(3);
        assert_eq!(h.monitor.hogging_threshold(), 1);
        assert_eq!(h.monitor.stuck_threshold(), 3);
        h.monitor.sweep();
        assert_eq!(h.monitor.stuck_thread_count(), 1);
    }

    #[test]
    fn detection_carries_thread_context() {
        let h = harness(1, 3, ReconcilePolicy::Exact);
        h.monitor.set_capture_origin_backtrace(true);
        let handle = std::thread::scope(|s| {
            std::thread::Builder::new()
                .name("req-worker".into())
                .spawn_scoped(s, || h.monitor.begin(WorkId(1), "/ctx"))
                .unwrap()
                .join()
                .unwrap()
        });
        h.clock.set(4_000);
        h.monitor.sweep();
        let detected = h.listener.detected();
        let trace = detected[0].stack_trace.as_deref().unwrap_or_default();
        assert!(trace.starts_with("thread 'req-worker'"));
        h.monitor.end(handle);
    }

    #[test]
    fn threshold_millis_clamps_negative() {
        assert_eq!(threshold_millis(-5), 0);
        assert_eq!(threshold_millis(3), 3_000);
        assert_eq!(threshold_millis(i64::MAX), u64::MAX);
    }

    #[test]
    fn report_reflects_counters() {
        let h = harness(1, 3, ReconcilePolicy::Exact);
        let _a = h.monitor.begin(WorkId(4), "/a");
        h.clock.set(4_000);
        h.monitor.sweep();
        let report = h.monitor.report();
        assert!(report.enabled);
        assert_eq!(report.active_count, 1);
        assert_eq!(report.stuck_count, 1);
        assert_eq!(report.stuck_ids, vec![WorkId(4)]);
        assert_eq!(report.metrics.sweeps_total, 1);
    }
}
