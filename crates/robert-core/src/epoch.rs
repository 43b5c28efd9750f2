//! Epoch clock and per-epoch broadcast material.
//!
//! The server fixes epoch 0 at `timeStart` and every epoch lasts
//! [`EPOCH_DURATION_SECS`]. For each epoch it issues an ephemeral Bluetooth
//! identifier (EBID) and an encrypted country code (ECC). The client stores
//! them indexed by epoch number and resolves the current epoch from the wall
//! clock.
//!
//! # Invariants
//!
//! - Epoch lookup is a pure function of `(clock, unix time)`
//! - Storing the same epoch twice is a no-op (last writer wins on content)
//! - Before the first epoch starts, no epoch is current

use std::collections::BTreeMap;

use robert_proto::{EpochTuple, ProtoError, b64_decode_exact, time::ntp_to_unix};
use serde::{Deserialize, Serialize};

/// Length of an epoch in seconds (15 minutes).
pub const EPOCH_DURATION_SECS: u64 = 900;

/// Size of an ephemeral Bluetooth identifier.
pub const EBID_SIZE: usize = 8;

/// Size of an encrypted country code.
pub const ECC_SIZE: usize = 2;

/// Broadcast material for one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epoch {
    /// Epoch number relative to the server's `timeStart`
    pub index: u32,
    /// Identifier advertised over the radio during this epoch
    pub ebid: [u8; EBID_SIZE],
    /// Encrypted country code advertised alongside the EBID
    pub ecc: [u8; ECC_SIZE],
}

impl Epoch {
    /// Decode a server tuple into binary epoch material.
    pub fn from_tuple(tuple: &EpochTuple) -> Result<Self, ProtoError> {
        Ok(Self {
            index: tuple.epoch_id,
            ebid: b64_decode_exact::<EBID_SIZE>("ebid", &tuple.key.ebid)?,
            ecc: b64_decode_exact::<ECC_SIZE>("ecc", &tuple.key.ecc)?,
        })
    }
}

/// Maps wall-clock time to epoch numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochClock {
    start_unix: u64,
    duration_secs: u64,
}

impl EpochClock {
    /// Clock whose epoch 0 begins at `start_unix`.
    ///
    /// A zero duration is clamped to one second.
    pub fn new(start_unix: u64, duration_secs: u64) -> Self {
        Self { start_unix, duration_secs: duration_secs.max(1) }
    }

    /// Clock from the server's NTP `timeStart` and the protocol epoch length.
    ///
    /// Returns `None` if `time_start_ntp` predates the Unix epoch.
    pub fn from_ntp_start(time_start_ntp: u64) -> Option<Self> {
        ntp_to_unix(time_start_ntp).map(|start| Self::new(start, EPOCH_DURATION_SECS))
    }

    /// Unix time at which epoch 0 starts.
    pub fn start_unix(&self) -> u64 {
        self.start_unix
    }

    /// Length of each epoch in seconds.
    pub fn duration_secs(&self) -> u64 {
        self.duration_secs
    }

    /// Epoch number containing `unix_secs`, or `None` before epoch 0 (or past
    /// the `u32` epoch range).
    pub fn index_at(&self, unix_secs: u64) -> Option<u32> {
        let elapsed = unix_secs.checked_sub(self.start_unix)?;
        u32::try_from(elapsed / self.duration_secs).ok()
    }

    /// Unix time at which `index` starts.
    pub fn epoch_start(&self, index: u32) -> u64 {
        self.start_unix.saturating_add(u64::from(index).saturating_mul(self.duration_secs))
    }
}

/// Epoch material received from the server, keyed by epoch number.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochStore {
    clock: Option<EpochClock>,
    epochs: BTreeMap<u32, Epoch>,
}

impl EpochStore {
    /// Empty store anchored to `clock`.
    pub fn new(clock: EpochClock) -> Self {
        Self { clock: Some(clock), epochs: BTreeMap::new() }
    }

    /// Clock used for time lookups, if registration has fixed one.
    pub fn clock(&self) -> Option<EpochClock> {
        self.clock
    }

    /// Insert or overwrite epochs. Returns the number of epochs not previously
    /// present.
    pub fn upsert(&mut self, epochs: impl IntoIterator<Item = Epoch>) -> usize {
        let mut added = 0;
        for epoch in epochs {
            if self.epochs.insert(epoch.index, epoch).is_none() {
                added += 1;
            }
        }
        added
    }

    /// Epoch with number `index`.
    pub fn get(&self, index: u32) -> Option<&Epoch> {
        self.epochs.get(&index)
    }

    /// Epoch covering `unix_secs`, if both the clock and the material exist.
    pub fn epoch_at(&self, unix_secs: u64) -> Option<&Epoch> {
        let index = self.clock?.index_at(unix_secs)?;
        self.epochs.get(&index)
    }

    /// Highest-numbered stored epoch.
    pub fn latest(&self) -> Option<&Epoch> {
        self.epochs.last_key_value().map(|(_, epoch)| epoch)
    }

    /// Epoch to authenticate a request sent at `unix_secs`: the current epoch
    /// when stored, otherwise the latest one available.
    pub fn for_request(&self, unix_secs: u64) -> Option<&Epoch> {
        self.epoch_at(unix_secs).or_else(|| self.latest())
    }

    /// Drop every epoch and the clock.
    pub fn clear(&mut self) {
        self.clock = None;
        self.epochs.clear();
    }

    /// Number of stored epochs.
    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    /// Whether no epochs are stored.
    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    /// Stored epochs in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &Epoch> {
        self.epochs.values()
    }
}

#[cfg(test)]
mod tests {
    use robert_proto::EpochKey;

    use super::*;

    fn epoch(index: u32) -> Epoch {
        Epoch { index, ebid: [index as u8; EBID_SIZE], ecc: [0xEC, index as u8] }
    }

    #[test]
    fn index_at_is_floor_of_elapsed_epochs() {
        let clock = EpochClock::new(1_000, 900);
        assert_eq!(clock.index_at(999), None);
        assert_eq!(clock.index_at(1_000), Some(0));
        assert_eq!(clock.index_at(1_899), Some(0));
        assert_eq!(clock.index_at(1_900), Some(1));
        assert_eq!(clock.epoch_start(3), 3_700);
    }

    #[test]
    fn from_ntp_start_converts_to_unix() {
        let clock = EpochClock::from_ntp_start(2_208_988_800 + 60).unwrap();
        assert_eq!(clock.start_unix(), 60);
        assert_eq!(clock.duration_secs(), EPOCH_DURATION_SECS);
        assert!(EpochClock::from_ntp_start(5).is_none());
    }

    #[test]
    fn upsert_is_idempotent() {
        let mut store = EpochStore::new(EpochClock::new(0, 900));
        assert_eq!(store.upsert([epoch(0), epoch(1)]), 2);
        assert_eq!(store.upsert([epoch(1), epoch(2)]), 1);
        assert_eq!(store.len(), 3);
        assert_eq!(store.get(1), Some(&epoch(1)));
    }

    #[test]
    fn epoch_at_resolves_from_clock() {
        let mut store = EpochStore::new(EpochClock::new(10_000, 900));
        store.upsert((0..4).map(epoch));

        assert_eq!(store.epoch_at(9_999), None);
        assert_eq!(store.epoch_at(10_000).map(|e| e.index), Some(0));
        assert_eq!(store.epoch_at(10_000 + 2 * 900 + 5).map(|e| e.index), Some(2));
        assert_eq!(store.epoch_at(10_000 + 10 * 900), None);
    }

    #[test]
    fn request_epoch_falls_back_to_latest() {
        let mut store = EpochStore::new(EpochClock::new(0, 900));
        store.upsert([epoch(0), epoch(1)]);

        assert_eq!(store.for_request(100).map(|e| e.index), Some(0));
        assert_eq!(store.for_request(900 * 50).map(|e| e.index), Some(1));
    }

    #[test]
    fn no_clock_means_no_current_epoch() {
        let mut store = EpochStore::default();
        store.upsert([epoch(0)]);
        assert_eq!(store.epoch_at(0), None);
        assert_eq!(store.for_request(0).map(|e| e.index), Some(0));

        store.clear();
        assert!(store.is_empty());
        assert!(store.clock().is_none());
        assert!(store.for_request(0).is_none());
    }

    #[test]
    fn from_tuple_checks_lengths() {
        let good = EpochTuple {
            epoch_id: 7,
            key: EpochKey { ebid: "AQIDBAUGBwg=".into(), ecc: "qrs=".into() },
        };
        let decoded = Epoch::from_tuple(&good).unwrap();
        assert_eq!(decoded.index, 7);
        assert_eq!(decoded.ebid, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(decoded.ecc, [0xAA, 0xBB]);

        let short =
            EpochTuple { epoch_id: 7, key: EpochKey { ebid: "AQID".into(), ecc: "qrs=".into() } };
        assert!(matches!(Epoch::from_tuple(&short), Err(ProtoError::InvalidLength { .. })));
    }
}
