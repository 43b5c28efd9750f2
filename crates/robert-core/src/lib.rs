//! ROBERT client core
//!
//! Local state of a ROBERT client: the epochs it broadcasts, the contacts it
//! has heard, and the registration state persisted across launches. Nothing
//! in this crate touches the network.
//!
//! # Components
//!
//! - [`env::Environment`]: wall clock, randomness and sleeping, injectable for
//!   deterministic tests
//! - [`epoch::EpochStore`]: per-epoch broadcast material indexed by epoch
//!   number, with time-to-epoch lookup
//! - [`proximity::ProximityRecorder`]: turns radio receptions into durable
//!   [`proximity::LocalProximity`] records and owns the retention policy
//! - [`session_store::SessionStore`]: atomic persistence of secrets, epochs
//!   and registration flags
//!
//! # Storage backends
//!
//! Both stores come in an in-memory flavour (tests, simulation) and a
//! redb-backed flavour sharing one database file ([`RedbDatabase`]).

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod env;
pub mod epoch;
mod error;
pub mod proximity;
mod redb_db;
pub mod session_store;

pub use epoch::{EBID_SIZE, ECC_SIZE, EPOCH_DURATION_SECS, Epoch, EpochClock, EpochStore};
pub use error::StorageError;
pub use proximity::{
    DEFAULT_RETENTION, LocalProximity, MAX_CLOCK_SKEW, MemoryProximityStore, ProximityId,
    ProximityRecorder, ProximitySnapshot, ProximityStore, RawReception, RecordOutcome,
    RedbProximityStore, RejectReason, group_contacts, write_csv,
};
pub use redb_db::RedbDatabase;
pub use session_store::{
    MemorySessionStore, PersistedSession, RedbSessionStore, SessionStore, StatusRecord,
    StoredSecrets,
};
