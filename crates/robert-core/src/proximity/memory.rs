//! In-memory proximity store.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, PoisonError},
};

use super::{LocalProximity, ProximityId, ProximitySnapshot, ProximityStore};
use crate::error::StorageError;

type Records = BTreeMap<ProximityId, LocalProximity>;

/// In-memory storage for tests and simulation.
///
/// Copy-on-write: a snapshot shares the current map, and the next mutation
/// clones it, so exports never block writers and never see later writes.
#[derive(Clone, Default)]
pub struct MemoryProximityStore {
    inner: Arc<Mutex<Arc<Records>>>,
}

impl MemoryProximityStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_records<R>(&self, f: impl FnOnce(&mut Arc<Records>) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

impl ProximityStore for MemoryProximityStore {
    type Snapshot = MemorySnapshot;

    fn insert(&self, record: &LocalProximity) -> Result<bool, StorageError> {
        Ok(self.with_records(|records| {
            if records.contains_key(&record.id) {
                return false;
            }
            Arc::make_mut(records).insert(record.id, record.clone());
            true
        }))
    }

    fn prune_before(&self, cutoff: u64) -> Result<usize, StorageError> {
        Ok(self.with_records(|records| {
            let expired = records.values().filter(|r| r.time_collected_on_device < cutoff).count();
            if expired > 0 {
                Arc::make_mut(records).retain(|_, r| r.time_collected_on_device >= cutoff);
            }
            expired
        }))
    }

    fn snapshot(&self) -> Result<Self::Snapshot, StorageError> {
        Ok(MemorySnapshot { records: self.with_records(|records| Arc::clone(records)) })
    }

    fn clear(&self) -> Result<usize, StorageError> {
        Ok(self.with_records(|records| {
            let removed = records.len();
            *records = Arc::default();
            removed
        }))
    }

    fn len(&self) -> Result<usize, StorageError> {
        Ok(self.with_records(|records| records.len()))
    }
}

/// Shared, immutable view of the in-memory map.
pub struct MemorySnapshot {
    records: Arc<Records>,
}

impl ProximitySnapshot for MemorySnapshot {
    fn len(&self) -> usize {
        self.records.len()
    }

    fn iter(&self) -> Box<dyn Iterator<Item = Result<LocalProximity, StorageError>> + '_> {
        Box::new(self.records.values().cloned().map(Ok))
    }
}
