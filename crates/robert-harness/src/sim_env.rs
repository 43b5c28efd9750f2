//! Simulated Environment with a settable wall clock and seeded RNG.

use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use robert_core::env::Environment;

/// Simulation environment.
///
/// - **Wall clock**: starts at a fixed Unix time and only moves when the test
///   calls [`SimEnv::advance`] or [`SimEnv::set_wall_clock`]. Epoch lookups
///   are therefore exact.
/// - **Seeded RNG**: `random_bytes()` uses ChaCha20Rng, so key pairs and
///   nonces repeat across runs with the same seed.
/// - **Sleep**: delegates to Tokio, so `#[tokio::test(start_paused = true)]`
///   makes retry back-off instantaneous.
///
/// Clones share the clock and the RNG stream.
#[derive(Clone)]
pub struct SimEnv {
    wall_clock: Arc<AtomicU64>,
    rng: Arc<Mutex<ChaCha20Rng>>,
}

impl SimEnv {
    /// Default start time: 2023-11-14T22:13:20Z.
    pub const DEFAULT_START: u64 = 1_700_000_000;

    /// Environment with seed 0 starting at [`SimEnv::DEFAULT_START`].
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment with a specific RNG seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            wall_clock: Arc::new(AtomicU64::new(Self::DEFAULT_START)),
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
        }
    }

    /// Move the wall clock to `unix_secs`.
    pub fn set_wall_clock(&self, unix_secs: u64) {
        self.wall_clock.store(unix_secs, Ordering::SeqCst);
    }

    /// Move the wall clock forward.
    pub fn advance(&self, by: Duration) {
        self.wall_clock.fetch_add(by.as_secs(), Ordering::SeqCst);
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SimEnv {
    fn wall_clock_secs(&self) -> u64 {
        self.wall_clock.load(Ordering::SeqCst)
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn random_bytes(&self, dest: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(dest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_moves_only_when_told() {
        let env = SimEnv::new();
        assert_eq!(env.wall_clock_secs(), SimEnv::DEFAULT_START);

        env.advance(Duration::from_secs(900));
        assert_eq!(env.wall_clock_secs(), SimEnv::DEFAULT_START + 900);

        env.set_wall_clock(5);
        assert_eq!(env.clone().wall_clock_secs(), 5);
    }

    #[test]
    fn same_seed_same_bytes() {
        let mut a = [0u8; 16];
        let mut b = [0u8; 16];
        SimEnv::with_seed(7).random_bytes(&mut a);
        SimEnv::with_seed(7).random_bytes(&mut b);
        assert_eq!(a, b);

        SimEnv::with_seed(8).random_bytes(&mut b);
        assert_ne!(a, b);
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_follows_tokio_time() {
        let start = tokio::time::Instant::now();
        SimEnv::new().sleep(Duration::from_secs(30)).await;
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }
}
