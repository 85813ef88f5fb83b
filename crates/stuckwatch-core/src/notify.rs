//! Notification surface for stuck detection and resolution.
//!
//! The engine decides *when* to notify; listeners decide how to surface it
//! (logs, metrics, alerts). A failing listener never aborts a sweep.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::record::{WorkId, WorkState};

/// Emitted once when a record is promoted to stuck.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StuckDetected {
    pub id: WorkId,
    pub descriptor: String,
    pub active_time_ms: u64,
    pub started_at: DateTime<Utc>,
    /// Stuck count including this record.
    pub stuck_count: i64,
    pub stuck_threshold_secs: i64,
    pub stack_trace: Option<String>,
}

/// Emitted once when a flagged record's completion is reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StuckResolved {
    pub id: WorkId,
    pub descriptor: String,
    pub total_active_time_ms: u64,
    /// Stuck count after reconciliation.
    pub stuck_count: i64,
    pub prior_state: WorkState,
}

/// Receives stuck notifications from the sweep thread.
pub trait StuckListener: Send + Sync {
    fn on_stuck_detected(&self, event: &StuckDetected) -> Result<()>;

    fn on_stuck_resolved(&self, event: &StuckResolved) -> Result<()>;
}

/// Run one listener callback, converting errors and panics into `false`.
pub(crate) fn deliver(kind: &'static str, f: impl FnOnce() -> Result<()>) -> bool {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::warn!(notification = kind, error = %e, "stuck listener failed");
            false
        }
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            tracing::warn!(notification = kind, panic = %msg, "stuck listener panicked");
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Listeners
// ---------------------------------------------------------------------------

/// Logs notifications at `warn` with structured fields. The default.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

impl StuckListener for TracingListener {
    fn on_stuck_detected(&self, event: &StuckDetected) -> Result<()> {
        tracing::warn!(
            work_id = %event.id,
            descriptor = %event.descriptor,
            active_time_ms = event.active_time_ms,
            started_at = %event.started_at.to_rfc3339(),
            stuck_count = event.stuck_count,
            stuck_threshold_secs = event.stuck_threshold_secs,
            stack_trace = event.stack_trace.as_deref().unwrap_or("<unavailable>"),
            "stuck work detected"
        );
        Ok(())
    }

    fn on_stuck_resolved(&self, event: &StuckResolved) -> Result<()> {
        tracing::warn!(
            work_id = %event.id,
            descriptor = %event.descriptor,
            total_active_time_ms = event.total_active_time_ms,
            stuck_count = event.stuck_count,
            prior_state = %event.prior_state,
            "flagged work completed"
        );
        Ok(())
    }
}

/// One recorded notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    Detected(StuckDetected),
    Resolved(StuckResolved),
}

/// Keeps every notification in memory, in delivery order.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Notification>>,
}

impl RecordingListener {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<Notification> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn detected(&self) -> Vec<StuckDetected> {
        self.events()
            .into_iter()
            .filter_map(|n| match n {
                Notification::Detected(d) => Some(d),
                Notification::Resolved(_) => None,
            })
            .collect()
    }

    #[must_use]
    pub fn resolved(&self) -> Vec<StuckResolved> {
        self.events()
            .into_iter()
            .filter_map(|n| match n {
                Notification::Resolved(r) => Some(r),
                Notification::Detected(_) => None,
            })
            .collect()
    }

    fn push(&self, n: Notification) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(n);
    }
}

impl StuckListener for RecordingListener {
    fn on_stuck_detected(&self, event: &StuckDetected) -> Result<()> {
        self.push(Notification::Detected(event.clone()));
        Ok(())
    }

    fn on_stuck_resolved(&self, event: &StuckResolved) -> Result<()> {
        self.push(Notification::Resolved(event.clone()));
        Ok(())
    }
}

/// Delivers to each listener in order. Every listener is attempted; the
/// first failure is reported after all have run.
#[derive(Default, Clone)]
pub struct FanoutListener {
    listeners: Vec<Arc<dyn StuckListener>>,
}

impl std::fmt::Debug for FanoutListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutListener")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl FanoutListener {
    #[must_use]
    pub fn new(listeners: Vec<Arc<dyn StuckListener>>) -> Self {
        Self { listeners }
    }

    #[must_use]
    pub fn with(mut self, listener: Arc<dyn StuckListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    fn each(&self, kind: &'static str, f: impl Fn(&dyn StuckListener) -> Result<()>) -> Result<()> {
        let mut failed = 0usize;
        for listener in &self.listeners {
            if !deliver(kind, || f(listener.as_ref())) {
                failed += 1;
            }
        }
        if failed == 0 {
            Ok(())
        } else {
            Err(Error::Listener(format!(
                "{failed} of {} listeners failed",
                self.listeners.len()
            )))
        }
    }
}

impl StuckListener for FanoutListener {
    fn on_stuck_detected(&self, event: &StuckDetected) -> Result<()> {
        self.each("stuck_detected", |l| l.on_stuck_detected(event))
    }

    fn on_stuck_resolved(&self, event: &StuckResolved) -> Result<()> {
        self.each("stuck_resolved", |l| l.on_stuck_resolved(event))
    }
}
