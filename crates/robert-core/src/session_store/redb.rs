//! Session store backed by redb.
//!
//! The whole session lives under a single key, so every save replaces it in
//! one write transaction.

use std::sync::Arc;

use redb::{Database, TableDefinition};

use super::{PersistedSession, SessionStore, decode_session, encode_session};
use crate::error::StorageError;

/// Table: session
/// Key: `SESSION_KEY`
/// Value: CBOR-encoded `PersistedSession`
pub(crate) const SESSION: TableDefinition<&str, &[u8]> = TableDefinition::new("session");

const SESSION_KEY: &str = "current";

/// Durable session storage backed by Redb.
#[derive(Clone)]
pub struct RedbSessionStore {
    db: Arc<Database>,
}

impl RedbSessionStore {
    pub(crate) fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl SessionStore for RedbSessionStore {
    fn load(&self) -> Result<Option<PersistedSession>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(SESSION).map_err(|e| StorageError::Io(e.to_string()))?;

        match table.get(SESSION_KEY).map_err(|e| StorageError::Io(e.to_string()))? {
            Some(value) => decode_session(value.value()).map(Some),
            None => Ok(None),
        }
    }

    fn save(&self, session: &PersistedSession) -> Result<(), StorageError> {
        let bytes = encode_session(session)?;

        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        {
            let mut table = txn.open_table(SESSION).map_err(|e| StorageError::Io(e.to_string()))?;
            table
                .insert(SESSION_KEY, bytes.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        {
            let mut table = txn.open_table(SESSION).map_err(|e| StorageError::Io(e.to_string()))?;
            table.remove(SESSION_KEY).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(())
    }
}
