//! Stuck and hogging work detection for concurrent request processing.
//!
//! This crate provides:
//! - The [`Monitor`] engine (`begin`/`end` bracketing, periodic `sweep`)
//! - A lock-free per-record state machine and active-work registry
//! - Notification listeners for stuck detection and resolution
//! - Environment-driven configuration and self-metrics
//! - A background [`Sweeper`] thread

#![forbid(unsafe_code)]

pub mod clock;
pub mod completion;
pub mod config;
pub mod error;
pub mod metrics;
pub mod monitor;
pub mod notify;
pub mod record;
pub mod registry;
pub mod report;
pub mod sweeper;

// Re-export key types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use completion::{CompletedFlagged, CompletionQueue};
pub use config::{MonitorConfig, ReconcilePolicy};
pub use error::{Error, Result};
pub use metrics::{Counter, GaugeI64, LatencySnapshot, LatencySummary, MonitorMetricsSnapshot};
pub use monitor::{Monitor, MonitorBuilder, SweepOutcome, SweepSummary, WorkGuard, WorkHandle};
pub use notify::{
    FanoutListener, Notification, RecordingListener, StuckDetected, StuckListener, StuckResolved,
    TracingListener,
};
pub use record::{WorkId, WorkRecord, WorkState};
pub use registry::ActiveRegistry;
pub use report::MonitorReport;
pub use sweeper::Sweeper;
