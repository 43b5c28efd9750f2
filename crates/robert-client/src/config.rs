//! Session configuration.

use std::time::Duration;

use robert_core::DEFAULT_RETENTION;
use robert_proto::ContactEncoding;

/// Tunables for a [`Session`](crate::Session).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Upper bound for each server exchange. Expiry resolves the operation
    /// to `NetworkFailure`.
    pub request_timeout: Duration,

    /// How long proximity records are kept before pruning.
    pub retention: Duration,

    /// Encoding of the contact export in status and report requests.
    pub contact_encoding: ContactEncoding,

    /// Unregister attempts before giving up on the server and cleaning up
    /// locally.
    pub unregister_attempts: u32,

    /// Delay between unregister attempts.
    pub unregister_retry_backoff: Duration,

    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            retention: DEFAULT_RETENTION,
            contact_encoding: ContactEncoding::Json,
            unregister_attempts: 3,
            unregister_retry_backoff: Duration::from_secs(1),
            event_capacity: 64,
        }
    }
}
