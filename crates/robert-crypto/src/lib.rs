//! ROBERT Client Cryptographic Primitives
//!
//! Cryptographic building blocks for the client side of the ROBERT proximity
//! tracing protocol. Pure functions with deterministic outputs. Callers
//! provide random bytes for deterministic testing.
//!
//! # Key Lifecycle
//!
//! ```text
//! Ephemeral P-256 key pair (fresh per registration attempt)
//!        │
//!        ▼
//! ECDH with server public key → shared secret (discarded after use)
//!        │
//!        ├── HMAC(shared, "mac")    → macKey  (authenticates requests)
//!        └── HMAC(shared, "tuples") → encKey  (decrypts epoch material)
//! ```
//!
//! The private key never leaves [`LocalPrivateKey`]; the only operation it
//! supports is agreement with a remote public key. Registration secrets are
//! rotated only by a full re-registration.
//!
//! # Security
//!
//! Domain Separation:
//! - `macKey` and `encKey` come from the same shared secret under distinct
//!   labels and are independent
//! - Request MACs carry a per-request-kind prefix byte so a status MAC can
//!   never be replayed as an unregister MAC
//!
//! Key Hygiene:
//! - Private scalars, shared secrets and derived keys are zeroized on drop
//! - A private key is consumed by [`derive_secrets`], so a failed agreement
//!   can never be retried against a different remote key

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
pub mod key_exchange;
pub mod mac;
pub mod tuples;

pub use error::CryptoError;
pub use key_exchange::{
    KeyPair, LocalPrivateKey, RegistrationSecrets, SECRET_KEY_SIZE, derive_secrets,
    derive_secrets_from_shared,
};
pub use mac::{MAC_SIZE, RequestKind, request_mac, verify_request_mac};
pub use tuples::{TUPLES_NONCE_SIZE, open_tuples, seal_tuples};
