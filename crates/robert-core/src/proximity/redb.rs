//! Redb-backed proximity store.
//!
//! Every insert, prune and clear runs in its own write transaction. Snapshots
//! hold a read transaction's table, which redb keeps stable against later
//! commits.

use std::sync::Arc;

use redb::{Database, ReadOnlyTable, ReadableTable, ReadableTableMetadata, TableDefinition};

use super::{LocalProximity, ProximityId, ProximitySnapshot, ProximityStore};
use crate::error::StorageError;

/// Table: local_proximity
/// Key: `ProximityId` [16 bytes]
/// Value: collection time (8 bytes BE) + CBOR-encoded `LocalProximity`
pub(crate) const PROXIMITIES: TableDefinition<&[u8], &[u8]> =
    TableDefinition::new("local_proximity");

/// Durable proximity storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbProximityStore {
    db: Arc<Database>,
}

impl RedbProximityStore {
    pub(crate) fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Delete every row whose value matches, in one write transaction.
    fn remove_where(
        &self,
        matches: impl Fn(&[u8]) -> Result<bool, StorageError>,
    ) -> Result<usize, StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        let removed = {
            let mut table =
                txn.open_table(PROXIMITIES).map_err(|e| StorageError::Io(e.to_string()))?;

            let mut doomed = Vec::new();
            for entry in table.iter().map_err(|e| StorageError::Io(e.to_string()))? {
                let (key, value) = entry.map_err(|e| StorageError::Io(e.to_string()))?;
                if matches(value.value())? {
                    doomed.push(key.value().to_vec());
                }
            }

            for key in &doomed {
                table.remove(key.as_slice()).map_err(|e| StorageError::Io(e.to_string()))?;
            }
            doomed.len()
        };
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(removed)
    }
}

impl ProximityStore for RedbProximityStore {
    type Snapshot = RedbSnapshot;

    fn insert(&self, record: &LocalProximity) -> Result<bool, StorageError> {
        let value = encode_record(record)?;

        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        let inserted = {
            let mut table =
                txn.open_table(PROXIMITIES).map_err(|e| StorageError::Io(e.to_string()))?;

            let key = record.id.as_bytes().as_slice();
            if table.get(key).map_err(|e| StorageError::Io(e.to_string()))?.is_some() {
                false
            } else {
                table
                    .insert(key, value.as_slice())
                    .map_err(|e| StorageError::Io(e.to_string()))?;
                true
            }
        };
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(inserted)
    }

    fn prune_before(&self, cutoff: u64) -> Result<usize, StorageError> {
        self.remove_where(|value| Ok(collected_at(value)? < cutoff))
    }

    fn snapshot(&self) -> Result<Self::Snapshot, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(PROXIMITIES).map_err(|e| StorageError::Io(e.to_string()))?;
        let len = table.len().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(RedbSnapshot { table, len: len as usize })
    }

    fn clear(&self) -> Result<usize, StorageError> {
        self.remove_where(|_| Ok(true))
    }

    fn len(&self) -> Result<usize, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(PROXIMITIES).map_err(|e| StorageError::Io(e.to_string()))?;
        let len = table.len().map_err(|e| StorageError::Io(e.to_string()))?;
        Ok(len as usize)
    }
}

/// Read-only table pinned at the moment the snapshot was taken.
pub struct RedbSnapshot {
    table: ReadOnlyTable<&'static [u8], &'static [u8]>,
    len: usize,
}

impl ProximitySnapshot for RedbSnapshot {
    fn len(&self) -> usize {
        self.len
    }

    fn iter(&self) -> Box<dyn Iterator<Item = Result<LocalProximity, StorageError>> + '_> {
        match self.table.iter() {
            Ok(range) => Box::new(range.map(|entry| {
                let (key, value) = entry.map_err(|e| StorageError::Io(e.to_string()))?;
                let record = decode_record(value.value())?;
                if ProximityId::from_bytes(key.value()) != Some(record.id) {
                    return Err(StorageError::Corrupted("record stored under foreign key".into()));
                }
                Ok(record)
            })),
            Err(e) => Box::new(std::iter::once(Err(StorageError::Io(e.to_string())))),
        }
    }
}

fn encode_record(record: &LocalProximity) -> Result<Vec<u8>, StorageError> {
    let mut bytes = Vec::with_capacity(96);
    bytes.extend_from_slice(&record.time_collected_on_device.to_be_bytes());
    ciborium::into_writer(record, &mut bytes)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(bytes)
}

fn collected_at(value: &[u8]) -> Result<u64, StorageError> {
    value
        .get(..8)
        .and_then(|prefix| <[u8; 8]>::try_from(prefix).ok())
        .map(u64::from_be_bytes)
        .ok_or_else(|| StorageError::Corrupted(format!("proximity value of {} bytes", value.len())))
}

fn decode_record(value: &[u8]) -> Result<LocalProximity, StorageError> {
    let time = collected_at(value)?;
    let record: LocalProximity = ciborium::from_reader(&value[8..])
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    if record.time_collected_on_device != time {
        return Err(StorageError::Corrupted("time prefix does not match record".into()));
    }
    Ok(record)
}
