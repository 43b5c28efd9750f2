//! Storage error types.

use thiserror::Error;

/// Errors from the local proximity and session stores.
///
/// Surfaced to callers as `StorageUnavailable`; a failed write never leaves a
/// partially written row.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Underlying database or I/O failure
    #[error("storage I/O error: {0}")]
    Io(String),

    /// Record could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Stored data violates an invariant
    #[error("corrupted record: {0}")]
    Corrupted(String),
}
