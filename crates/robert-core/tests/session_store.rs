//! Session persistence across both backends.

use robert_core::{
    Epoch, EpochClock, EpochStore, MemorySessionStore, PersistedSession, RedbDatabase,
    SessionStore, StatusRecord, StoredSecrets,
};
use robert_crypto::derive_secrets_from_shared;

fn sample() -> PersistedSession {
    let mut epochs = EpochStore::new(EpochClock::new(3_000, 900));
    epochs.upsert((0..3).map(|i| Epoch { index: i, ebid: [i as u8; 8], ecc: [0xEE, i as u8] }));

    PersistedSession {
        registered: true,
        sick: false,
        secrets: Some(StoredSecrets::from_secrets(&derive_secrets_from_shared(&[3; 32]))),
        epochs,
        last_status: Some(StatusRecord {
            at_risk: false,
            last_exposure_timeframe: None,
            message: None,
            checked_at: 3_500,
        }),
    }
}

fn check_round_trip<S: SessionStore>(store: &S) {
    assert_eq!(store.load().unwrap(), None);

    store.save(&sample()).unwrap();
    assert_eq!(store.load().unwrap(), Some(sample()));

    let mut updated = sample();
    updated.sick = true;
    store.save(&updated).unwrap();
    assert_eq!(store.load().unwrap().map(|s| s.sick), Some(true));

    store.clear().unwrap();
    assert_eq!(store.load().unwrap(), None);
}

#[test]
fn memory_session_round_trip() {
    check_round_trip(&MemorySessionStore::new());
}

#[test]
fn redb_session_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let db = RedbDatabase::open(dir.path().join("client.redb")).unwrap();
    check_round_trip(&db.session_store());
}

#[test]
fn redb_session_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("client.redb");
    RedbDatabase::open(&path).unwrap().session_store().save(&sample()).unwrap();

    let loaded = RedbDatabase::open(&path).unwrap().session_store().load().unwrap().unwrap();
    assert!(loaded.is_consistent());
    assert_eq!(loaded.epochs.len(), 3);
    assert_eq!(loaded.epochs.epoch_at(3_000 + 900).map(|e| e.index), Some(1));
}
