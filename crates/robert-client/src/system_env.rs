//! Production Environment implementation using system time and RNG.
//!
//! `SystemEnv` is the production implementation of the Environment trait:
//! the real wall clock, OS cryptographic randomness (getrandom) and Tokio
//! sleeping. Behavior is non-deterministic by construction.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use robert_core::env::{EntropyError, Environment};

/// Production environment using the system clock and cryptographic RNG.
///
/// # Panics
///
/// `random_bytes` panics if the OS RNG fails. Key generation goes through
/// `try_random_bytes` instead, which reports the failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn wall_clock_secs(&self) -> u64 {
        // A clock before 1970 maps every lookup to "before epoch 0".
        SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |elapsed| elapsed.as_secs())
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer)
            .expect("invariant: OS RNG failure is unrecoverable - client cannot register securely");
    }

    fn try_random_bytes(&self, buffer: &mut [u8]) -> Result<(), EntropyError> {
        getrandom::fill(buffer).map_err(|e| EntropyError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wall_clock_is_after_2020() {
        assert!(SystemEnv::new().wall_clock_secs() > 1_577_836_800);
    }

    #[test]
    fn random_bytes_differ() {
        let env = SystemEnv::new();
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        env.random_bytes(&mut a);
        env.random_bytes(&mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn fallible_fill_uses_os_entropy() {
        let mut buffer = [0u8; 32];
        SystemEnv::new().try_random_bytes(&mut buffer).unwrap();
        assert_ne!(buffer, [0u8; 32]);
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_uses_tokio_clock() {
        let start = tokio::time::Instant::now();
        SystemEnv::new().sleep(Duration::from_secs(5)).await;
        assert!(start.elapsed() >= Duration::from_secs(5));
    }
}
