//! In-memory session store.

use std::sync::{Arc, Mutex, PoisonError};

use super::{PersistedSession, SessionStore};
use crate::error::StorageError;

/// In-memory session storage for tests and simulation.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    inner: Arc<Mutex<Option<PersistedSession>>>,
}

impl MemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<PersistedSession>, StorageError> {
        Ok(self.inner.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save(&self, session: &PersistedSession) -> Result<(), StorageError> {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}
