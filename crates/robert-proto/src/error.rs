//! Error types for wire encoding and decoding.

use thiserror::Error;

/// Errors produced while encoding or decoding wire bodies.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtoError {
    /// JSON body could not be produced or parsed
    #[error("json: {0}")]
    Json(String),

    /// CBOR contact blob could not be produced or parsed
    #[error("cbor: {0}")]
    Cbor(String),

    /// Field is not valid base64
    #[error("base64 in {field}: {reason}")]
    Base64 {
        /// Wire field name
        field: &'static str,
        /// Decoder error description
        reason: String,
    },

    /// Decoded field has the wrong length
    #[error("invalid length for {field}: expected {expected}, got {got}")]
    InvalidLength {
        /// Wire field name
        field: &'static str,
        /// Expected byte length
        expected: usize,
        /// Actual byte length
        got: usize,
    },

    /// Time value is before the Unix epoch or does not fit the wire width
    #[error("time out of range: {0}")]
    TimeOutOfRange(u64),
}

impl From<serde_json::Error> for ProtoError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}
