//! Proximity recording.
//!
//! Each radio reception of a peer's HELLO message is validated and stored as
//! a [`LocalProximity`]. Records are immutable once written. The recorder owns
//! the retention policy and hands out point-in-time snapshots for export.
//!
//! # Invariants
//!
//! - A record is either fully stored or absent; there are no partial rows
//! - Re-recording the same `(ebid, time collected)` pair is a no-op
//! - An export iterates a snapshot: records inserted or pruned while the
//!   export runs are not observed
//! - After pruning with retention `R` at time `T`, no record older than
//!   `T - R` remains
//! - Every stored receipt time converts to NTP seconds without overflow and
//!   lies at most [`MAX_CLOCK_SKEW`] past the local clock

mod export;
mod memory;
pub(crate) mod redb;

use std::time::Duration;

pub use export::{CSV_HEADER, group_contacts, write_csv};
pub use memory::{MemoryProximityStore, MemorySnapshot};
use robert_proto::time::NTP_UNIX_OFFSET;
use serde::{Deserialize, Serialize};

pub use self::redb::{RedbProximityStore, RedbSnapshot};
use crate::{
    env::Environment,
    epoch::{EBID_SIZE, ECC_SIZE},
    error::StorageError,
};

/// Default retention for local proximity records (14 days).
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// Largest HELLO MAC accepted from the radio layer.
pub const HELLO_MAC_MAX_SIZE: usize = 32;

/// How far past the local clock a radio-supplied receipt time may lie.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(60 * 60);

/// Latest receipt time (Unix seconds) still representable in NTP seconds.
pub const MAX_RECEIPT_TIME: u64 = u64::MAX - NTP_UNIX_OFFSET;

/// Stable record identifier: peer EBID followed by the big-endian collection
/// time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProximityId([u8; 16]);

impl ProximityId {
    /// Identifier of a reception of `ebid` collected at `collected_at` (Unix
    /// seconds).
    pub fn derive(ebid: &[u8; EBID_SIZE], collected_at: u64) -> Self {
        let mut id = [0u8; 16];
        id[..EBID_SIZE].copy_from_slice(ebid);
        id[EBID_SIZE..].copy_from_slice(&collected_at.to_be_bytes());
        Self(id)
    }

    /// Raw identifier bytes (used as the storage key).
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Rebuild from a storage key.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        <[u8; 16]>::try_from(bytes).ok().map(Self)
    }
}

/// A validated, stored reception of a peer's HELLO message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalProximity {
    /// Record identifier
    pub id: ProximityId,
    /// Peer EBID
    pub ebid: [u8; EBID_SIZE],
    /// Peer ECC
    pub ecc: [u8; ECC_SIZE],
    /// HELLO MAC as received
    pub mac: Vec<u8>,
    /// 16-bit time carried inside the HELLO message
    pub time_from_hello_message: u16,
    /// Local receipt time, Unix seconds
    pub time_collected_on_device: u64,
    /// Raw RSSI
    pub rssi_raw: i32,
    /// Calibrated RSSI
    pub rssi_calibrated: i32,
    /// Advertised transmit power
    pub tx_power: i32,
}

/// A reception as delivered by the radio layer, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReception {
    /// Peer EBID bytes
    pub ebid: Vec<u8>,
    /// Peer ECC bytes
    pub ecc: Vec<u8>,
    /// HELLO MAC bytes
    pub mac: Vec<u8>,
    /// 16-bit time carried inside the HELLO message
    pub time_from_hello_message: u16,
    /// Raw RSSI
    pub rssi_raw: i32,
    /// Calibrated RSSI
    pub rssi_calibrated: i32,
    /// Advertised transmit power
    pub tx_power: i32,
    /// Receipt time in Unix seconds; `None` stamps it with the current time
    pub received_at: Option<u64>,
}

/// Why a reception was not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// EBID is not exactly 8 bytes
    InvalidEbidLength(usize),
    /// ECC is not exactly 2 bytes
    InvalidEccLength(usize),
    /// HELLO MAC is empty or longer than 32 bytes
    InvalidMacLength(usize),
    /// Receipt time is unrepresentable on the wire or too far in the future
    InvalidTimestamp(u64),
}

/// Result of recording one reception.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Newly stored
    Stored(ProximityId),
    /// Already present; nothing written
    Duplicate(ProximityId),
    /// Malformed reception, dropped
    Rejected(RejectReason),
}

impl RawReception {
    /// Validate and convert into a record stamped with `collected_at`.
    pub fn into_record(self, collected_at: u64) -> Result<LocalProximity, RejectReason> {
        let ebid = <[u8; EBID_SIZE]>::try_from(self.ebid.as_slice())
            .map_err(|_| RejectReason::InvalidEbidLength(self.ebid.len()))?;
        let ecc = <[u8; ECC_SIZE]>::try_from(self.ecc.as_slice())
            .map_err(|_| RejectReason::InvalidEccLength(self.ecc.len()))?;
        if self.mac.is_empty() || self.mac.len() > HELLO_MAC_MAX_SIZE {
            return Err(RejectReason::InvalidMacLength(self.mac.len()));
        }
        if collected_at > MAX_RECEIPT_TIME {
            return Err(RejectReason::InvalidTimestamp(collected_at));
        }

        Ok(LocalProximity {
            id: ProximityId::derive(&ebid, collected_at),
            ebid,
            ecc,
            mac: self.mac,
            time_from_hello_message: self.time_from_hello_message,
            time_collected_on_device: collected_at,
            rssi_raw: self.rssi_raw,
            rssi_calibrated: self.rssi_calibrated,
            tx_power: self.tx_power,
        })
    }
}

/// Point-in-time view of a proximity store.
pub trait ProximitySnapshot {
    /// Number of records in the snapshot.
    fn len(&self) -> usize;

    /// Whether the snapshot holds no records.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records in identifier order.
    fn iter(&self) -> Box<dyn Iterator<Item = Result<LocalProximity, StorageError>> + '_>;
}

/// Durable storage for proximity records.
///
/// Must be Clone (shared by the recorder and the session), Send + Sync
/// (radio callbacks arrive on arbitrary threads), and synchronous. Each method
/// is atomic on its own.
pub trait ProximityStore: Clone + Send + Sync + 'static {
    /// Snapshot type returned by [`ProximityStore::snapshot`]
    type Snapshot: ProximitySnapshot;

    /// Store `record` unless a record with the same id exists.
    ///
    /// Returns whether the record was written.
    fn insert(&self, record: &LocalProximity) -> Result<bool, StorageError>;

    /// Remove every record collected strictly before `cutoff` (Unix seconds).
    ///
    /// Returns the number of records removed.
    fn prune_before(&self, cutoff: u64) -> Result<usize, StorageError>;

    /// Stable view of all records at this instant.
    fn snapshot(&self) -> Result<Self::Snapshot, StorageError>;

    /// Remove every record. Returns the number removed.
    fn clear(&self) -> Result<usize, StorageError>;

    /// Current number of records.
    fn len(&self) -> Result<usize, StorageError>;
}

/// Validates receptions and applies the retention policy.
#[derive(Clone)]
pub struct ProximityRecorder<S, E> {
    store: S,
    env: E,
}

impl<S: ProximityStore, E: Environment> ProximityRecorder<S, E> {
    /// Recorder writing to `store`, stamping receptions with `env`'s clock.
    pub fn new(store: S, env: E) -> Self {
        Self { store, env }
    }

    /// Underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Validate and store one reception.
    ///
    /// Malformed receptions, including receipt times more than
    /// [`MAX_CLOCK_SKEW`] ahead of the local clock, are dropped and reported
    /// as [`RecordOutcome::Rejected`]; only storage failures are errors.
    pub fn record(&self, reception: RawReception) -> Result<RecordOutcome, StorageError> {
        let now = self.env.wall_clock_secs();
        let collected_at = reception.received_at.unwrap_or(now);

        let checked = if collected_at > now.saturating_add(MAX_CLOCK_SKEW.as_secs()) {
            Err(RejectReason::InvalidTimestamp(collected_at))
        } else {
            reception.into_record(collected_at)
        };
        let record = match checked {
            Ok(record) => record,
            Err(reason) => {
                tracing::debug!(?reason, "dropping malformed reception");
                return Ok(RecordOutcome::Rejected(reason));
            },
        };

        if self.store.insert(&record)? {
            tracing::trace!(collected_at, "stored proximity");
            Ok(RecordOutcome::Stored(record.id))
        } else {
            Ok(RecordOutcome::Duplicate(record.id))
        }
    }

    /// Remove records older than `retention` relative to now.
    pub fn prune_older_than(&self, retention: Duration) -> Result<usize, StorageError> {
        let cutoff = self.env.wall_clock_secs().saturating_sub(retention.as_secs());
        let removed = self.store.prune_before(cutoff)?;
        if removed > 0 {
            tracing::info!(removed, cutoff, "pruned expired proximities");
        }
        Ok(removed)
    }

    /// Snapshot of every stored record.
    pub fn export_all(&self) -> Result<S::Snapshot, StorageError> {
        self.store.snapshot()
    }

    /// Erase every stored record.
    pub fn clear_all(&self) -> Result<usize, StorageError> {
        let removed = self.store.clear()?;
        tracing::info!(removed, "erased local proximities");
        Ok(removed)
    }
}
