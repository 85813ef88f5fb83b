//! Per-unit-of-work record and its lock-free state machine.
//!
//! ```text
//! Running ──► Hogging ──► Stuck
//!    │           │          │
//!    └───────────┴──────────┴──► Done (terminal)
//! ```
//!
//! All transitions go through a single `AtomicU8`. Promotions are CAS
//! operations so they are idempotent across sweep cycles; completion is a
//! swap so `end` always observes the exact state it replaced, no matter how
//! it races with a concurrent promotion.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::cell::Cell;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, millis_to_utc};

// ---------------------------------------------------------------------------
// Work state
// ---------------------------------------------------------------------------

/// Lifecycle state of a monitored unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkState {
    Running = 0,
    Hogging = 1,
    Stuck = 2,
    Done = 3,
}

impl WorkState {
    /// Convert from the raw `AtomicU8` representation.
    #[must_use]
    pub const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Running,
            1 => Self::Hogging,
            2 => Self::Stuck,
            _ => Self::Done,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Hogging => "hogging",
            Self::Stuck => "stuck",
            Self::Done => "done",
        }
    }

    /// Whether a sweep has flagged this work (hogging or stuck).
    #[must_use]
    pub const fn is_flagged(self) -> bool {
        matches!(self, Self::Hogging | Self::Stuck)
    }
}

impl std::fmt::Display for WorkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Work identity
// ---------------------------------------------------------------------------

/// Opaque key for one concurrently executing unit of work.
///
/// Must be unique among currently active work. Thread-per-request hosts can
/// use [`WorkId::current_thread`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkId(pub u64);

static NEXT_THREAD_WORK_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_WORK_ID: Cell<u64> = const { Cell::new(0) };
}

impl WorkId {
    /// Stable id for the calling OS thread, unique for the process lifetime.
    #[must_use]
    pub fn current_thread() -> Self {
        THREAD_WORK_ID.with(|cell| {
            let mut id = cell.get();
            if id == 0 {
                id = NEXT_THREAD_WORK_ID.fetch_add(1, Ordering::Relaxed);
                cell.set(id);
            }
            Self(id)
        })
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for WorkId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl std::fmt::Display for WorkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Work record
// ---------------------------------------------------------------------------

/// Immutable identity plus atomic state for one in-flight unit of work.
#[derive(Debug)]
pub struct WorkRecord {
    id: WorkId,
    descriptor: String,
    start_ms: u64,
    thread_name: Option<String>,
    origin: Option<Backtrace>,
    state: AtomicU8,
}

impl WorkRecord {
    /// Create a record in the `Running` state, stamped with `clock`'s time.
    #[must_use]
    pub fn new(id: WorkId, descriptor: impl Into<String>, clock: &dyn Clock) -> Self {
        Self::with_start(id, descriptor, clock.now_millis())
    }

    #[must_use]
    pub fn with_start(id: WorkId, descriptor: impl Into<String>, start_ms: u64) -> Self {
        Self {
            id,
            descriptor: descriptor.into(),
            start_ms,
            thread_name: std::thread::current().name().map(str::to_owned),
            origin: None,
            state: AtomicU8::new(WorkState::Running as u8),
        }
    }

    /// Attach a backtrace of the `begin` call site.
    ///
    /// Honors `RUST_BACKTRACE`/`RUST_LIB_BACKTRACE`; when those disable
    /// capture nothing is stored.
    #[must_use]
    pub fn with_origin_backtrace(mut self) -> Self {
        let bt = Backtrace::capture();
        if bt.status() == BacktraceStatus::Captured {
            self.origin = Some(bt);
        }
        self
    }

    #[must_use]
    pub const fn id(&self) -> WorkId {
        self.id
    }

    #[must_use]
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    #[must_use]
    pub const fn start_millis(&self) -> u64 {
        self.start_ms
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        millis_to_utc(self.start_ms)
    }

    #[must_use]
    pub fn thread_name(&self) -> Option<&str> {
        self.thread_name.as_deref()
    }

    /// Rendered execution context for stuck reports.
    ///
    /// Rust cannot sample a foreign thread's stack, so this is the thread name
    /// plus the `begin`-site backtrace when one was captured.
    #[must_use]
    pub fn stack_trace(&self) -> Option<String> {
        match (&self.thread_name, &self.origin) {
            (None, None) => None,
            (Some(name), None) => Some(format!("thread '{name}'")),
            (None, Some(bt)) => Some(bt.to_string()),
            (Some(name), Some(bt)) => Some(format!("thread '{name}' began work at:\n{bt}")),
        }
    }

    /// Elapsed time since start, recomputed on every call.
    ///
    /// Saturates at zero if the clock moved backwards.
    #[must_use]
    pub fn elapsed_millis(&self, clock: &dyn Clock) -> u64 {
        clock.now_millis().saturating_sub(self.start_ms)
    }

    #[must_use]
    pub fn state(&self) -> WorkState {
        WorkState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// CAS `Running → Hogging`. Returns whether this call performed it.
    pub fn promote_to_hogging(&self) -> bool {
        self.transition(WorkState::Running, WorkState::Hogging)
    }

    /// CAS `Hogging → Stuck`. Work that was never observed hogging cannot
    /// become stuck.
    pub fn promote_to_stuck(&self) -> bool {
        self.transition(WorkState::Hogging, WorkState::Stuck)
    }

    /// Swap to `Done`, returning the state that was replaced.
    pub fn mark_done(&self) -> WorkState {
        WorkState::from_u8(self.state.swap(WorkState::Done as u8, Ordering::AcqRel))
    }

    #[inline]
    fn transition(&self, from: WorkState, to: WorkState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
