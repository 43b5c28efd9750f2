//! Shared Redb database file.

use std::{path::Path, sync::Arc};

use redb::Database;

use crate::{
    error::StorageError,
    proximity::{RedbProximityStore, redb::PROXIMITIES},
    session_store::{RedbSessionStore, redb::SESSION},
};

/// One database file holding both the proximity and session tables.
///
/// Redb allows a single open handle per file, so both stores are handed out
/// from here and share it. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbDatabase {
    db: Arc<Database>,
}

impl RedbDatabase {
    /// Open or create the database at `path`, creating missing tables.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(|e| StorageError::Io(e.to_string()))?;

        let txn = db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        {
            let _ = txn.open_table(PROXIMITIES).map_err(|e| StorageError::Io(e.to_string()))?;
            let _ = txn.open_table(SESSION).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        tracing::debug!(path = %path.as_ref().display(), "opened client database");
        Ok(Self { db: Arc::new(db) })
    }

    /// Proximity store backed by this file.
    pub fn proximity_store(&self) -> RedbProximityStore {
        RedbProximityStore::new(Arc::clone(&self.db))
    }

    /// Session store backed by this file.
    pub fn session_store(&self) -> RedbSessionStore {
        RedbSessionStore::new(Arc::clone(&self.db))
    }
}
