//! Error types for the client session.
//!
//! Two layers: [`ApiError`] describes what went wrong on the wire, and
//! [`SessionError`] is the typed outcome callers see. The session maps one to
//! the other depending on the operation (a 401 on registration is a bad
//! captcha, on report a bad code).

use robert_core::StorageError;
use robert_crypto::CryptoError;
use thiserror::Error;

use crate::event::{Operation, SessionState};

/// Failures of a single server exchange.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// No response within the deadline
    #[error("request timed out")]
    Timeout,

    /// Connection could not be established or broke mid-exchange
    #[error("connection failed: {0}")]
    Connection(String),

    /// Presented leaf certificate does not match the pinned certificate
    #[error("server certificate does not match the pinned certificate")]
    CertificatePinning,

    /// Server answered with a non-success status
    #[error("server rejected request with status {status}: {message}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Response body or reason
        message: String,
    },

    /// Request body could not be encoded
    #[error("request encoding failed: {0}")]
    Encode(String),

    /// Response body could not be decoded
    #[error("response decoding failed: {0}")]
    Decode(String),
}

/// Typed outcome of a failed session operation.
///
/// Whatever the variant, persisted state reflects only fully committed prior
/// successes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Key pair generation failed; retry registration
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// ECDH agreement with the server key failed
    #[error("key agreement failed")]
    KeyAgreementFailed,

    /// Server public key could not be parsed
    #[error("invalid server public key: {0}")]
    InvalidRemoteKey(String),

    /// Server refused the captcha answer
    #[error("captcha rejected")]
    InvalidCaptcha,

    /// Server refused the verification code
    #[error("verification code rejected")]
    InvalidCode,

    /// Transport failure or timeout
    #[error("network failure: {0}")]
    NetworkFailure(String),

    /// Server refused the request for another reason
    #[error("server rejected request (status {status}): {message}")]
    ServerRejected {
        /// HTTP status code, 200 when the body carried `success: false`
        status: u16,
        /// Server-supplied reason
        message: String,
    },

    /// Local storage failed
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] StorageError),

    /// Another protocol operation is in flight
    #[error("{0} already in progress")]
    OperationInProgress(Operation),

    /// Server certificate did not match the pinned certificate
    #[error("certificate pinning failed")]
    CertificatePinningFailed,

    /// Operation not allowed in the current state
    #[error("cannot {operation} while {state:?}")]
    InvalidState {
        /// State when the operation was attempted
        state: SessionState,
        /// Operation that was attempted
        operation: Operation,
    },

    /// No epoch material to authenticate the request with
    #[error("no epoch material available")]
    NoEpochMaterial,

    /// Status check abandoned because a report took priority
    #[error("preempted by report")]
    Preempted,

    /// Server response failed validation
    #[error("malformed server response: {0}")]
    MalformedResponse(String),

    /// Request body could not be built
    #[error("request encoding failed: {0}")]
    Encoding(String),
}

impl SessionError {
    /// Returns true if retrying the same operation later may succeed.
    ///
    /// Rejections of the caller's input (captcha, code) and state violations
    /// are never transient.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NetworkFailure(_)
            | Self::OperationInProgress(_)
            | Self::Preempted
            | Self::StorageUnavailable(_) => true,
            Self::ServerRejected { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Map a transport failure in the context of `operation`.
    pub(crate) fn from_api(err: ApiError, operation: Operation) -> Self {
        match err {
            ApiError::Timeout => Self::NetworkFailure(format!("{operation} timed out")),
            ApiError::Connection(reason) => Self::NetworkFailure(reason),
            ApiError::CertificatePinning => Self::CertificatePinningFailed,
            ApiError::Rejected { status: 401 | 403, .. } if operation == Operation::Register => {
                Self::InvalidCaptcha
            },
            ApiError::Rejected { status: 400 | 401 | 403, .. }
                if operation == Operation::Report =>
            {
                Self::InvalidCode
            },
            ApiError::Rejected { status, message } => Self::ServerRejected { status, message },
            ApiError::Encode(reason) => Self::Encoding(reason),
            ApiError::Decode(reason) => Self::MalformedResponse(reason),
        }
    }
}

impl From<CryptoError> for SessionError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::KeyGenerationFailed { .. } | CryptoError::KeyEncoding { .. } => {
                Self::KeyGenerationFailed(err.to_string())
            },
            CryptoError::InvalidRemoteKey { reason } => Self::InvalidRemoteKey(reason),
            CryptoError::KeyAgreementFailed => Self::KeyAgreementFailed,
            CryptoError::TuplesTooShort { .. } | CryptoError::DecryptionFailed => {
                Self::MalformedResponse(err.to_string())
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_maps_per_operation() {
        let rejected = || ApiError::Rejected { status: 401, message: String::new() };
        assert_eq!(
            SessionError::from_api(rejected(), Operation::Register),
            SessionError::InvalidCaptcha
        );
        assert_eq!(
            SessionError::from_api(rejected(), Operation::Report),
            SessionError::InvalidCode
        );
        assert!(matches!(
            SessionError::from_api(rejected(), Operation::CheckStatus),
            SessionError::ServerRejected { status: 401, .. }
        ));
    }

    #[test]
    fn pinning_failure_is_not_transient() {
        let err = SessionError::from_api(ApiError::CertificatePinning, Operation::CheckStatus);
        assert_eq!(err, SessionError::CertificatePinningFailed);
        assert!(!err.is_transient());
    }

    #[test]
    fn transient_classification() {
        assert!(SessionError::NetworkFailure("reset".into()).is_transient());
        let rejected = |status| SessionError::ServerRejected { status, message: String::new() };
        assert!(rejected(503).is_transient());
        assert!(!rejected(404).is_transient());
        assert!(!SessionError::InvalidCaptcha.is_transient());
        assert!(!SessionError::NoEpochMaterial.is_transient());
    }

    #[test]
    fn crypto_errors_map_to_session_kinds() {
        assert_eq!(
            SessionError::from(CryptoError::KeyAgreementFailed),
            SessionError::KeyAgreementFailed
        );
        assert!(matches!(
            SessionError::from(CryptoError::DecryptionFailed),
            SessionError::MalformedResponse(_)
        ));
    }
}
