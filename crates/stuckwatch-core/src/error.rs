//! Error types for the stuck-work detector.
//!
//! The hot path (`begin`/`end`/`sweep`) never returns these. They surface at
//! the edges: configuration loading, listener delivery, and worker lifecycle.

use thiserror::Error;

/// Result type alias for stuckwatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for stuckwatch
#[derive(Debug, Error)]
pub enum Error {
    // ==========================================================================
    // Configuration Errors
    // ==========================================================================
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ==========================================================================
    // Notification Errors
    // ==========================================================================
    #[error("Listener failed: {0}")]
    Listener(String),

    // ==========================================================================
    // Lifecycle Errors
    // ==========================================================================
    #[error("Failed to spawn sweeper worker: {0}")]
    WorkerSpawn(#[from] std::io::Error),

    #[error("Sweeper already running")]
    AlreadyRunning,

    // ==========================================================================
    // Serialization Errors
    // ==========================================================================
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Returns the error type string (for JSON reports)
    #[must_use]
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::Listener(_) => "LISTENER_ERROR",
            Self::WorkerSpawn(_) => "OS_ERROR",
            Self::AlreadyRunning => "ALREADY_RUNNING",
            Self::Serialization(_) => "TYPE_ERROR",
        }
    }

    /// Returns whether the operation may succeed if attempted again.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Listener(_) | Self::WorkerSpawn(_))
    }
}
