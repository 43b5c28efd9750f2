//! Persisted registration state.
//!
//! Everything the client must remember across launches lives in one
//! [`PersistedSession`] value that is written in a single transaction: the
//! registration and sick flags, the derived secrets, the epoch material and
//! the last status result.
//!
//! # Invariants
//!
//! - `registered` implies secrets and an epoch clock are present
//! - A save either replaces the whole value or leaves the previous one
//! - `clear` removes secrets and epochs together

mod memory;
pub(crate) mod redb;

use std::fmt;

pub use memory::MemorySessionStore;
use robert_crypto::{RegistrationSecrets, SECRET_KEY_SIZE};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

pub use self::redb::RedbSessionStore;
use crate::{epoch::EpochStore, error::StorageError};

/// Registration secrets in their stored form.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSecrets {
    mac_key: [u8; SECRET_KEY_SIZE],
    enc_key: [u8; SECRET_KEY_SIZE],
}

impl StoredSecrets {
    /// Copy secrets into their stored form.
    pub fn from_secrets(secrets: &RegistrationSecrets) -> Self {
        Self { mac_key: *secrets.mac_key(), enc_key: *secrets.enc_key() }
    }

    /// Rebuild usable secrets.
    pub fn to_secrets(&self) -> RegistrationSecrets {
        RegistrationSecrets::from_keys(self.mac_key, self.enc_key)
    }
}

impl fmt::Debug for StoredSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StoredSecrets(..)")
    }
}

impl Drop for StoredSecrets {
    fn drop(&mut self) {
        self.mac_key.zeroize();
        self.enc_key.zeroize();
    }
}

/// Outcome of the most recent successful status check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    /// Whether the server reported an exposure
    pub at_risk: bool,
    /// Server-supplied exposure timeframe, if any
    pub last_exposure_timeframe: Option<i64>,
    /// Optional server message
    pub message: Option<String>,
    /// When the check completed, Unix seconds
    pub checked_at: u64,
}

/// Complete persisted client state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    /// Registration completed and not yet unregistered
    pub registered: bool,
    /// A positive diagnosis has been reported from this device
    pub sick: bool,
    /// Secrets derived at registration
    pub secrets: Option<StoredSecrets>,
    /// Epoch clock and material
    pub epochs: EpochStore,
    /// Last status check result
    pub last_status: Option<StatusRecord>,
}

impl PersistedSession {
    /// Whether the value satisfies the registration invariant.
    pub fn is_consistent(&self) -> bool {
        !self.registered || (self.secrets.is_some() && self.epochs.clock().is_some())
    }

    /// Forget secrets, epochs and status while keeping the sick flag.
    pub fn reset_registration(&mut self) {
        self.registered = false;
        self.secrets = None;
        self.epochs.clear();
        self.last_status = None;
    }
}

/// Durable storage for the [`PersistedSession`].
///
/// Must be Clone, Send + Sync, and synchronous, like the proximity store.
pub trait SessionStore: Clone + Send + Sync + 'static {
    /// Load the stored session, or `None` on first launch.
    fn load(&self) -> Result<Option<PersistedSession>, StorageError>;

    /// Atomically replace the stored session.
    fn save(&self, session: &PersistedSession) -> Result<(), StorageError>;

    /// Remove the stored session.
    fn clear(&self) -> Result<(), StorageError>;
}

pub(crate) fn encode_session(session: &PersistedSession) -> Result<Vec<u8>, StorageError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(session, &mut bytes)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(bytes)
}

pub(crate) fn decode_session(bytes: &[u8]) -> Result<PersistedSession, StorageError> {
    ciborium::from_reader(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use robert_crypto::derive_secrets_from_shared;

    use super::*;
    use crate::epoch::{Epoch, EpochClock};

    fn registered() -> PersistedSession {
        let mut epochs = EpochStore::new(EpochClock::new(1_000, 900));
        epochs.upsert([Epoch { index: 0, ebid: [1; 8], ecc: [2; 2] }]);
        PersistedSession {
            registered: true,
            sick: false,
            secrets: Some(StoredSecrets::from_secrets(&derive_secrets_from_shared(&[5; 32]))),
            epochs,
            last_status: None,
        }
    }

    #[test]
    fn registered_without_secrets_is_inconsistent() {
        let mut session = registered();
        assert!(session.is_consistent());
        session.secrets = None;
        assert!(!session.is_consistent());
        assert!(PersistedSession::default().is_consistent());
    }

    #[test]
    fn reset_keeps_sick_flag() {
        let mut session = registered();
        session.sick = true;
        session.reset_registration();
        assert!(!session.registered);
        assert!(session.sick);
        assert!(session.secrets.is_none());
        assert!(session.epochs.is_empty());
    }

    #[test]
    fn secrets_survive_storage_form() {
        let secrets = derive_secrets_from_shared(&[9; 32]);
        assert_eq!(StoredSecrets::from_secrets(&secrets).to_secrets(), secrets);
    }

    #[test]
    fn cbor_encoding_preserves_session() {
        let session = registered();
        let decoded = decode_session(&encode_session(&session).unwrap()).unwrap();
        assert_eq!(decoded, session);
    }

    #[test]
    fn debug_hides_secrets() {
        let rendered = format!("{:?}", registered());
        assert!(rendered.contains("StoredSecrets(..)"));
    }
}
