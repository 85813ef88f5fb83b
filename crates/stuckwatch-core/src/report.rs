//! Point-in-time management view of a [`Monitor`](crate::Monitor).

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::ReconcilePolicy;
use crate::metrics::MonitorMetricsSnapshot;
use crate::record::WorkId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorReport {
    pub generated_at: DateTime<Utc>,
    pub enabled: bool,
    pub stuck_threshold_secs: i64,
    pub hogging_threshold_secs: i64,
    pub reconcile_policy: ReconcilePolicy,
    pub active_count: usize,
    pub hogging_count: i64,
    pub stuck_count: i64,
    pub stuck_ids: Vec<WorkId>,
    /// Flagged completions not yet reconciled by a sweep.
    pub pending_completions: usize,
    pub metrics: MonitorMetricsSnapshot,
}

impl MonitorReport {
    /// Pretty JSON for operators.
    pub fn to_json_pretty(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// One-line human summary.
    #[must_use]
    pub fn summary_line(&self) -> String {
        if !self.enabled {
            return format!("monitoring disabled; {} sweeps run", self.metrics.sweeps_total);
        }
        format!(
            "active={} hogging={} stuck={} pending={} detected_total={} resolved_total={}",
            self.active_count,
            self.hogging_count,
            self.stuck_count,
            self.pending_completions,
            self.metrics.stuck_detected_total,
            self.metrics.resolved_total,
        )
    }
}
