//! Concurrent map of in-flight work, keyed by [`WorkId`].
//!
//! Worker threads insert and remove their own entries; the sweep iterates a
//! live view. Iteration never fails under concurrent modification and may
//! observe a slightly evolving set, which the sweep tolerates.

use std::sync::Arc;

use dashmap::DashMap;

use crate::record::{WorkId, WorkRecord, WorkState};

#[derive(Debug, Default)]
pub struct ActiveRegistry {
    entries: DashMap<WorkId, Arc<WorkRecord>>,
}

impl ActiveRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unconditionally. A stale entry under the same id is replaced.
    pub fn put(&self, record: Arc<WorkRecord>) {
        let id = record.id();
        if self.entries.insert(id, record).is_some() {
            tracing::debug!(work_id = %id, "replaced stale active entry");
        }
    }

    /// Remove by id; no-op if absent.
    pub fn remove(&self, id: WorkId) -> Option<Arc<WorkRecord>> {
        self.entries.remove(&id).map(|(_, r)| r)
    }

    /// Remove only if `id` still maps to `record`.
    ///
    /// Returns `false` when the entry is absent or belongs to a newer
    /// `begin` that reused the id.
    pub fn remove_exact(&self, record: &Arc<WorkRecord>) -> bool {
        self.entries
            .remove_if(&record.id(), |_, current| Arc::ptr_eq(current, record))
            .is_some()
    }

    #[must_use]
    pub fn get(&self, id: WorkId) -> Option<Arc<WorkRecord>> {
        self.entries.get(&id).map(|e| Arc::clone(e.value()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lazily iterated live view of the current records.
    ///
    /// A shard read lock is held while the iterator is inside that shard, so
    /// do not call back into the registry from the same thread mid-iteration.
    pub fn iter(&self) -> impl Iterator<Item = Arc<WorkRecord>> + '_ {
        self.entries.iter().map(|e| Arc::clone(e.value()))
    }

    /// Point-in-time copy of the current records, holding no locks.
    ///
    /// The sweep works from this so listener callbacks never run under a
    /// shard lock.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<WorkRecord>> {
        self.iter().collect()
    }

    /// Ids of entries currently in `state`, sorted ascending.
    #[must_use]
    pub fn ids_in_state(&self, state: WorkState) -> Vec<WorkId> {
        let mut ids: Vec<WorkId> = self
            .iter()
            .filter(|r| r.state() == state)
            .map(|r| r.id())
            .collect();
        ids.sort_unstable();
        ids
    }
}
