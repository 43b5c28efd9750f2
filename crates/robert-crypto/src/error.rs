//! Error types for cryptographic operations.

use thiserror::Error;

/// Errors from key exchange, MAC and tuple decryption.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Random material could not be turned into a valid P-256 scalar
    #[error("key generation failed after {attempts} attempts")]
    KeyGenerationFailed {
        /// Number of candidate scalars rejected
        attempts: usize,
    },

    /// Remote public key is not a valid P-256 point in SPKI DER or SEC1 form
    #[error("invalid remote public key: {reason}")]
    InvalidRemoteKey {
        /// Parser error description
        reason: String,
    },

    /// Agreement produced unusable key material
    #[error("key agreement failed")]
    KeyAgreementFailed,

    /// Public key could not be encoded for transmission
    #[error("public key encoding failed: {reason}")]
    KeyEncoding {
        /// Encoder error description
        reason: String,
    },

    /// Sealed epoch material is shorter than nonce plus tag
    #[error("sealed tuples too short: {len} bytes")]
    TuplesTooShort {
        /// Length of the sealed blob
        len: usize,
    },

    /// AEAD authentication failed (wrong key or tampered ciphertext)
    #[error("tuple decryption failed")]
    DecryptionFailed,
}
