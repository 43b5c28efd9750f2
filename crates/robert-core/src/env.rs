//! Environment abstraction for deterministic testing.
//!
//! Decouples protocol logic from system resources (wall clock, randomness).
//! Enables deterministic simulation (settable clock, seeded RNG) and
//! production use with real system resources.

use std::time::Duration;

use thiserror::Error;

/// The entropy source could not fill a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("entropy source failed: {0}")]
pub struct EntropyError(pub String);

/// Abstract environment providing time, randomness, and async sleeping.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `random_bytes()` uses cryptographically secure entropy in production
/// - Methods are infallible except in exceptional circumstances (e.g., OS
///   entropy exhaustion)
pub trait Environment: Clone + Send + Sync + 'static {
    /// Current wall-clock time in Unix seconds.
    ///
    /// Epoch lookup and contact timestamps are derived from this value, so it
    /// must track real time (unlike a monotonic instant).
    fn wall_clock_secs(&self) -> u64;

    /// Sleeps for the specified duration.
    ///
    /// Only used by retry loops; protocol decisions never depend on it.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Given the same RNG seed, this produces the same sequence of bytes
    /// - Uses cryptographically secure RNG
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Fills the buffer with random bytes, reporting entropy failure instead
    /// of aborting.
    ///
    /// Key generation goes through this so a broken entropy source surfaces
    /// as an error. Environments that cannot fail keep the default.
    fn try_random_bytes(&self, buffer: &mut [u8]) -> Result<(), EntropyError> {
        self.random_bytes(buffer);
        Ok(())
    }
}
