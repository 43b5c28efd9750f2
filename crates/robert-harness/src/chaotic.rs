//! Chaotic session store wrapper for fault injection testing.
//!
//! Delegates to an underlying [`SessionStore`] but fails saves on demand or
//! at a seeded random rate, to verify that the session never publishes state
//! it could not persist.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicUsize, Ordering},
};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use robert_core::{PersistedSession, SessionStore, StorageError};

/// Session store wrapper that injects write failures.
#[derive(Clone)]
pub struct ChaoticSessionStore<S: SessionStore> {
    inner: S,
    /// Failure rate for saves (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    /// Saves that fail unconditionally before the rate applies
    forced_failures: Arc<AtomicUsize>,
    rng: Arc<Mutex<ChaCha20Rng>>,
    save_count: Arc<AtomicUsize>,
}

impl<S: SessionStore> ChaoticSessionStore<S> {
    /// Wrapper that only fails when told to via [`Self::fail_next_saves`].
    pub fn new(inner: S) -> Self {
        Self::with_rate(inner, 0.0, 0x1234_5678_9ABC_DEF0)
    }

    /// Wrapper failing each save with probability `failure_rate`.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    #[allow(clippy::panic)]
    pub fn with_rate(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            forced_failures: Arc::new(AtomicUsize::new(0)),
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
            save_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail the next `count` saves.
    pub fn fail_next_saves(&self, count: usize) {
        self.forced_failures.store(count, Ordering::SeqCst);
    }

    /// Underlying store (for checking state after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total number of save attempts.
    pub fn save_count(&self) -> usize {
        self.save_count.load(Ordering::SeqCst)
    }

    fn should_fail(&self) -> bool {
        let forced = self
            .forced_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        forced
            || self.rng.lock().unwrap_or_else(PoisonError::into_inner).gen_bool(self.failure_rate)
    }
}

impl<S: SessionStore> SessionStore for ChaoticSessionStore<S> {
    fn load(&self) -> Result<Option<PersistedSession>, StorageError> {
        self.inner.load()
    }

    fn save(&self, session: &PersistedSession) -> Result<(), StorageError> {
        self.save_count.fetch_add(1, Ordering::SeqCst);
        if self.should_fail() {
            return Err(StorageError::Io("chaotic failure injection".to_string()));
        }
        self.inner.save(session)
    }

    fn clear(&self) -> Result<(), StorageError> {
        if self.should_fail() {
            return Err(StorageError::Io("chaotic failure injection".to_string()));
        }
        self.inner.clear()
    }
}
