//! Configuration management for the stuck-work detector.
//!
//! Values come from environment variables with compiled-in defaults. Invalid
//! values fall back to the default rather than failing startup.

use std::env;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default stuck threshold in seconds (10 minutes).
pub const DEFAULT_STUCK_THRESHOLD_SECS: i64 = 600;
/// Default hogging threshold in seconds.
pub const DEFAULT_HOGGING_THRESHOLD_SECS: i64 = 60;
/// Default sweep cadence in seconds.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 10;

/// How reconciled completions adjust the live counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcilePolicy {
    /// Counters track exactly the records currently hogging or stuck.
    ///
    /// Promotion to stuck moves one unit from hogging to stuck; a completion
    /// decrements only the counter of the state it ended in.
    #[default]
    Exact,
    /// Promotions only increment; every completion decrements both counters.
    ///
    /// Hogging-only completions can drive the stuck counter negative.
    Blanket,
}

impl ReconcilePolicy {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "exact" => Some(Self::Exact),
            "blanket" | "legacy" => Some(Self::Blanket),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Blanket => "blanket",
        }
    }
}

impl std::fmt::Display for ReconcilePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Monitor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Seconds before hogging work is declared stuck. `<= 0` disables monitoring.
    pub stuck_threshold_secs: i64,
    /// Seconds before running work is declared hogging.
    pub hogging_threshold_secs: i64,
    /// Background sweep cadence.
    pub sweep_interval_secs: u64,
    /// Capture a backtrace at `begin` for stuck reports (costly).
    pub capture_origin_backtrace: bool,
    pub reconcile_policy: ReconcilePolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            stuck_threshold_secs: DEFAULT_STUCK_THRESHOLD_SECS,
            hogging_threshold_secs: DEFAULT_HOGGING_THRESHOLD_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            capture_origin_backtrace: false,
            reconcile_policy: ReconcilePolicy::Exact,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from environment variables
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        config.stuck_threshold_secs = env_i64("STUCK_THRESHOLD_SECONDS", config.stuck_threshold_secs);
        config.hogging_threshold_secs =
            env_i64("HOGGING_THRESHOLD_SECONDS", config.hogging_threshold_secs);
        config.sweep_interval_secs = env_u64("SWEEP_INTERVAL_SECONDS", config.sweep_interval_secs);
        config.capture_origin_backtrace =
            env_bool("CAPTURE_ORIGIN_BACKTRACE", config.capture_origin_backtrace);
        if let Some(v) = env_value("RECONCILE_POLICY") {
            match ReconcilePolicy::parse(&v) {
                Some(policy) => config.reconcile_policy = policy,
                None => tracing::warn!(
                    value = %v,
                    "ignoring unknown RECONCILE_POLICY (expected exact|blanket)"
                ),
            }
        }

        config
    }

    /// Whether detection is active.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.stuck_threshold_secs > 0
    }

    /// Check values that would make the monitor misbehave.
    ///
    /// A stuck threshold at or below the hogging threshold is accepted but
    /// logged: work only becomes stuck once the hogging threshold passes, and
    /// then in the same sweep that promotes it to hogging.
    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval_secs == 0 {
            return Err(Error::InvalidConfig(
                "sweep_interval_secs must be greater than 0".into(),
            ));
        }
        if self.is_enabled() && self.stuck_threshold_secs <= self.hogging_threshold_secs {
            tracing::warn!(
                stuck_threshold_secs = self.stuck_threshold_secs,
                hogging_threshold_secs = self.hogging_threshold_secs,
                "stuck threshold is not above hogging threshold; work turns stuck in the same sweep that first sees it hogging"
            );
        }
        Ok(())
    }
}

// Helper functions for environment variable parsing

#[cfg(test)]
thread_local! {
    static TEST_ENV_OVERRIDES: std::cell::RefCell<std::collections::HashMap<String, String>> =
        std::cell::RefCell::new(std::collections::HashMap::new());
}

#[cfg(test)]
fn test_env_override_value(key: &str) -> Option<String> {
    TEST_ENV_OVERRIDES.with(|cell| cell.borrow().get(key).cloned())
}

/// Read a value from the process environment.
#[must_use]
pub fn env_value(key: &str) -> Option<String> {
    #[cfg(test)]
    if let Some(v) = test_env_override_value(key) {
        return Some(v);
    }
    env::var(key).ok()
}

fn parse_bool(value: &str, default: bool) -> bool {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" => true,
        "0" | "false" | "f" | "no" | "n" => false,
        _ => default,
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    env_value(key).map_or(default, |v| parse_bool(&v, default))
}

fn env_i64(key: &str, default: i64) -> i64 {
    env_value(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_value(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
