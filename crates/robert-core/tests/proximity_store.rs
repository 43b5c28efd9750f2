//! Proximity store behaviour across both backends.

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread,
    time::Duration,
};

use proptest::prelude::*;
use robert_core::{
    DEFAULT_RETENTION, MAX_CLOCK_SKEW, MemoryProximityStore, ProximityRecorder, ProximitySnapshot,
    ProximityStore, RawReception, RecordOutcome, RedbDatabase, RejectReason, env::Environment,
    group_contacts,
};

const DAY: u64 = 24 * 60 * 60;
const NOW: u64 = 1_700_000_000;

#[derive(Clone)]
struct FixedClock(Arc<AtomicU64>);

impl FixedClock {
    fn at(secs: u64) -> Self {
        Self(Arc::new(AtomicU64::new(secs)))
    }
}

impl Environment for FixedClock {
    fn wall_clock_secs(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    async fn sleep(&self, _duration: Duration) {}

    fn random_bytes(&self, buffer: &mut [u8]) {
        buffer.fill(7);
    }
}

fn reception(ebid: u8, received_at: Option<u64>) -> RawReception {
    RawReception {
        ebid: vec![ebid; 8],
        ecc: vec![0xCC, ebid],
        mac: vec![0x5A; 8],
        time_from_hello_message: 42,
        rssi_raw: -80,
        rssi_calibrated: -72,
        tx_power: 3,
        received_at,
    }
}

fn temp_db() -> (tempfile::TempDir, RedbDatabase) {
    let dir = tempfile::tempdir().unwrap();
    let db = RedbDatabase::open(dir.path().join("client.redb")).unwrap();
    (dir, db)
}

fn check_record_then_export<S: ProximityStore>(store: S) {
    let recorder = ProximityRecorder::new(store, FixedClock::at(NOW));

    let outcome = recorder.record(reception(1, None)).unwrap();
    assert!(matches!(outcome, RecordOutcome::Stored(_)));

    let exported: Vec<_> =
        recorder.export_all().unwrap().iter().collect::<Result<_, _>>().unwrap();
    assert_eq!(exported.len(), 1);
    assert_eq!(exported[0].time_collected_on_device, NOW);
    assert_eq!(exported[0].ebid, [1; 8]);
}

fn check_duplicate_is_noop<S: ProximityStore>(store: S) {
    let recorder = ProximityRecorder::new(store, FixedClock::at(NOW));

    let first = recorder.record(reception(2, Some(NOW))).unwrap();
    let second = recorder.record(reception(2, Some(NOW))).unwrap();

    let RecordOutcome::Stored(id) = first else { panic!("expected Stored, got {first:?}") };
    assert_eq!(second, RecordOutcome::Duplicate(id));
    assert_eq!(recorder.store().len().unwrap(), 1);
}

fn check_prune_uses_retention<S: ProximityStore>(store: S) {
    let recorder = ProximityRecorder::new(store, FixedClock::at(NOW));
    for (ebid, age_days) in [(1, 1), (2, 10), (3, 20)] {
        recorder.record(reception(ebid, Some(NOW - age_days * DAY))).unwrap();
    }

    assert_eq!(recorder.prune_older_than(DEFAULT_RETENTION).unwrap(), 1);

    let remaining: Vec<u64> = recorder
        .export_all()
        .unwrap()
        .iter()
        .map(|r| r.unwrap().time_collected_on_device)
        .collect();
    assert_eq!(remaining.len(), 2);
    assert!(remaining.iter().all(|&t| t >= NOW - 14 * DAY));
}

fn check_snapshot_is_stable<S: ProximityStore>(store: S) {
    let recorder = ProximityRecorder::new(store, FixedClock::at(NOW));
    recorder.record(reception(1, Some(NOW))).unwrap();
    recorder.record(reception(2, Some(NOW - 30 * DAY))).unwrap();

    let snapshot = recorder.export_all().unwrap();
    recorder.record(reception(3, Some(NOW))).unwrap();
    recorder.prune_older_than(DEFAULT_RETENTION).unwrap();

    assert_eq!(snapshot.len(), 2);
    let seen: Vec<u8> = snapshot.iter().map(|r| r.unwrap().ebid[0]).collect();
    assert_eq!(seen, vec![1, 2]);
    assert_eq!(recorder.store().len().unwrap(), 2);
}

fn check_clear_all<S: ProximityStore>(store: S) {
    let recorder = ProximityRecorder::new(store, FixedClock::at(NOW));
    for ebid in 0..5 {
        recorder.record(reception(ebid, Some(NOW))).unwrap();
    }
    assert_eq!(recorder.clear_all().unwrap(), 5);
    assert!(recorder.export_all().unwrap().is_empty());
}

#[test]
fn memory_record_then_export() {
    check_record_then_export(MemoryProximityStore::new());
}

#[test]
fn redb_record_then_export() {
    let (_dir, db) = temp_db();
    check_record_then_export(db.proximity_store());
}

#[test]
fn memory_duplicate_is_noop() {
    check_duplicate_is_noop(MemoryProximityStore::new());
}

#[test]
fn redb_duplicate_is_noop() {
    let (_dir, db) = temp_db();
    check_duplicate_is_noop(db.proximity_store());
}

#[test]
fn memory_prune_uses_retention() {
    check_prune_uses_retention(MemoryProximityStore::new());
}

#[test]
fn redb_prune_uses_retention() {
    let (_dir, db) = temp_db();
    check_prune_uses_retention(db.proximity_store());
}

#[test]
fn memory_snapshot_is_stable() {
    check_snapshot_is_stable(MemoryProximityStore::new());
}

#[test]
fn redb_snapshot_is_stable() {
    let (_dir, db) = temp_db();
    check_snapshot_is_stable(db.proximity_store());
}

#[test]
fn memory_clear_all() {
    check_clear_all(MemoryProximityStore::new());
}

#[test]
fn redb_clear_all() {
    let (_dir, db) = temp_db();
    check_clear_all(db.proximity_store());
}

#[test]
fn malformed_reception_is_rejected_not_stored() {
    let recorder = ProximityRecorder::new(MemoryProximityStore::new(), FixedClock::at(NOW));
    let mut bad = reception(1, None);
    bad.ecc = vec![1];

    let outcome = recorder.record(bad).unwrap();
    assert_eq!(outcome, RecordOutcome::Rejected(RejectReason::InvalidEccLength(1)));
    assert_eq!(recorder.store().len().unwrap(), 0);
}

#[test]
fn redb_records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("client.redb");
    {
        let db = RedbDatabase::open(&path).unwrap();
        let recorder = ProximityRecorder::new(db.proximity_store(), FixedClock::at(NOW));
        recorder.record(reception(9, None)).unwrap();
    }

    let db = RedbDatabase::open(&path).unwrap();
    assert_eq!(db.proximity_store().len().unwrap(), 1);
}

fn check_concurrent_inserts_while_exporting<S: ProximityStore>(store: S) {
    let recorder = ProximityRecorder::new(store, FixedClock::at(NOW));

    let writers: Vec<_> = (0..4u8)
        .map(|t| {
            let recorder = recorder.clone();
            thread::spawn(move || {
                for i in 0..25u64 {
                    recorder.record(reception(t, Some(NOW + i))).unwrap();
                }
            })
        })
        .collect();

    for _ in 0..20 {
        let snapshot = recorder.export_all().unwrap();
        let mut seen = HashSet::new();
        for record in snapshot.iter() {
            let record = record.unwrap();
            assert!(seen.insert(record.id), "record {:?} exported twice", record.id);
        }
        assert_eq!(seen.len(), snapshot.len());
    }

    for writer in writers {
        writer.join().unwrap();
    }
    assert_eq!(recorder.store().len().unwrap(), 100);
}

#[test]
fn memory_concurrent_inserts_while_exporting() {
    check_concurrent_inserts_while_exporting(MemoryProximityStore::new());
}

#[test]
fn redb_concurrent_inserts_while_exporting() {
    let (_dir, db) = temp_db();
    check_concurrent_inserts_while_exporting(db.proximity_store());
}

fn check_prune_while_exporting<S: ProximityStore>(store: S) {
    let recorder = ProximityRecorder::new(store, FixedClock::at(NOW));
    for ebid in 0..8u8 {
        for age in 0..25u64 {
            recorder.record(reception(ebid, Some(NOW - 30 * DAY - age))).unwrap();
        }
    }
    recorder.record(reception(99, Some(NOW))).unwrap();

    let snapshot = recorder.export_all().unwrap();
    assert_eq!(snapshot.len(), 201);

    let pruner = {
        let recorder = recorder.clone();
        thread::spawn(move || recorder.prune_older_than(DEFAULT_RETENTION).unwrap())
    };

    let mut seen = HashSet::new();
    for record in snapshot.iter() {
        let record = record.unwrap();
        assert!(seen.insert(record.id), "record {:?} exported twice", record.id);
    }
    assert_eq!(seen.len(), 201);

    assert_eq!(pruner.join().unwrap(), 200);
    drop(snapshot);
    assert_eq!(recorder.store().len().unwrap(), 1);
}

#[test]
fn memory_prune_while_exporting() {
    check_prune_while_exporting(MemoryProximityStore::new());
}

#[test]
fn redb_prune_while_exporting() {
    let (_dir, db) = temp_db();
    check_prune_while_exporting(db.proximity_store());
}

fn check_implausible_receipt_times_rejected<S: ProximityStore>(store: S) {
    let recorder = ProximityRecorder::new(store, FixedClock::at(NOW));

    for at in [u64::MAX - 10, NOW + MAX_CLOCK_SKEW.as_secs() + 1] {
        let outcome = recorder.record(reception(1, Some(at))).unwrap();
        assert_eq!(outcome, RecordOutcome::Rejected(RejectReason::InvalidTimestamp(at)));
    }
    let edge = recorder.record(reception(2, Some(NOW + MAX_CLOCK_SKEW.as_secs()))).unwrap();
    assert!(matches!(edge, RecordOutcome::Stored(_)));

    // Export of what was kept still converts to wire time
    let contacts = group_contacts(&recorder.export_all().unwrap()).unwrap();
    assert_eq!(contacts.len(), 1);
    assert_eq!(recorder.store().len().unwrap(), 1);
}

#[test]
fn memory_implausible_receipt_times_rejected() {
    check_implausible_receipt_times_rejected(MemoryProximityStore::new());
}

#[test]
fn redb_implausible_receipt_times_rejected() {
    let (_dir, db) = temp_db();
    check_implausible_receipt_times_rejected(db.proximity_store());
}

proptest! {
    #[test]
    fn recording_is_idempotent(
        times in prop::collection::vec(0u64..1_000, 1..40),
        ebid in any::<u8>(),
    ) {
        let recorder = ProximityRecorder::new(MemoryProximityStore::new(), FixedClock::at(NOW));
        for &t in &times {
            recorder.record(reception(ebid, Some(NOW - t))).unwrap();
        }
        let once = recorder.store().len().unwrap();

        for &t in &times {
            let outcome = recorder.record(reception(ebid, Some(NOW - t))).unwrap();
            prop_assert!(matches!(outcome, RecordOutcome::Duplicate(_)));
        }

        let mut distinct = times.clone();
        distinct.sort_unstable();
        distinct.dedup();
        prop_assert_eq!(once, distinct.len());
        prop_assert_eq!(recorder.store().len().unwrap(), once);
    }

    #[test]
    fn prune_leaves_nothing_older_than_cutoff(
        ages in prop::collection::vec(0u64..40 * DAY, 0..30),
        retention_days in 1u64..30,
    ) {
        let recorder = ProximityRecorder::new(MemoryProximityStore::new(), FixedClock::at(NOW));
        for (i, &age) in ages.iter().enumerate() {
            recorder.record(reception(i as u8, Some(NOW - age))).unwrap();
        }

        recorder.prune_older_than(Duration::from_secs(retention_days * DAY)).unwrap();

        let cutoff = NOW - retention_days * DAY;
        for record in recorder.export_all().unwrap().iter() {
            prop_assert!(record.unwrap().time_collected_on_device >= cutoff);
        }
    }
}
