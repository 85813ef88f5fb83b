//! Completion reports for work that finished while flagged.
//!
//! Many worker threads push; only the sweep pops. Counters are reconciled
//! from this single consumer so each flagged completion is counted exactly
//! once.

use crossbeam::queue::SegQueue;
use serde::Serialize;

use crate::record::{WorkId, WorkState};

/// A unit of work that ended while hogging or stuck.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletedFlagged {
    pub id: WorkId,
    pub descriptor: String,
    pub total_active_time_ms: u64,
    /// State replaced by `mark_done`; always `Hogging` or `Stuck`.
    pub prior_state: WorkState,
}

/// Unbounded lock-free MPSC queue of [`CompletedFlagged`] reports.
#[derive(Debug, Default)]
pub struct CompletionQueue {
    inner: SegQueue<CompletedFlagged>,
}

impl CompletionQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, completed: CompletedFlagged) {
        self.inner.push(completed);
    }

    pub fn pop(&self) -> Option<CompletedFlagged> {
        self.inner.pop()
    }

    /// Pop until empty. Items pushed while draining are picked up too.
    pub fn drain(&self) -> impl Iterator<Item = CompletedFlagged> + '_ {
        std::iter::from_fn(|| self.inner.pop())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
