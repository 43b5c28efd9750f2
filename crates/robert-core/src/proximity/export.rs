//! Export of proximity snapshots: wire contacts and CSV.

use std::{collections::BTreeMap, io::Write};

use robert_proto::{Contact, ContactId, b64_encode, time::unix_to_ntp};

use super::{LocalProximity, ProximitySnapshot};
use crate::{
    epoch::{EBID_SIZE, ECC_SIZE},
    error::StorageError,
};

/// Header row written by [`write_csv`].
pub const CSV_HEADER: &str = "id,ebid,ecc,mac,time_from_hello_message,time_collected_on_device,\
                              rssi_raw,rssi_calibrated,tx_power";

/// Group a snapshot by peer `(ebid, ecc)` into wire contacts.
///
/// Groups are ordered by EBID; receptions inside a group keep snapshot order.
pub fn group_contacts(snapshot: &impl ProximitySnapshot) -> Result<Vec<Contact>, StorageError> {
    let mut groups: BTreeMap<([u8; EBID_SIZE], [u8; ECC_SIZE]), Vec<ContactId>> = BTreeMap::new();

    for record in snapshot.iter() {
        let record = record?;
        groups.entry((record.ebid, record.ecc)).or_default().push(contact_id(&record));
    }

    Ok(groups
        .into_iter()
        .map(|((ebid, ecc), ids)| Contact { ebid: b64_encode(&ebid), ecc: b64_encode(&ecc), ids })
        .collect())
}

fn contact_id(record: &LocalProximity) -> ContactId {
    ContactId {
        time_collected_on_device: unix_to_ntp(record.time_collected_on_device),
        time_from_hello_message: record.time_from_hello_message,
        mac: b64_encode(&record.mac),
        rssi_raw: record.rssi_raw,
        rssi_calibrated: record.rssi_calibrated,
    }
}

/// Write a snapshot as CSV, one row per record. Binary fields are base64.
///
/// Returns the number of rows written (excluding the header).
pub fn write_csv(
    snapshot: &impl ProximitySnapshot,
    mut out: impl Write,
) -> Result<usize, StorageError> {
    writeln!(out, "{CSV_HEADER}").map_err(|e| StorageError::Io(e.to_string()))?;

    let mut rows = 0;
    for record in snapshot.iter() {
        let r = record?;
        writeln!(
            out,
            "{},{},{},{},{},{},{},{},{}",
            b64_encode(r.id.as_bytes()),
            b64_encode(&r.ebid),
            b64_encode(&r.ecc),
            b64_encode(&r.mac),
            r.time_from_hello_message,
            r.time_collected_on_device,
            r.rssi_raw,
            r.rssi_calibrated,
            r.tx_power,
        )
        .map_err(|e| StorageError::Io(e.to_string()))?;
        rows += 1;
    }
    out.flush().map_err(|e| StorageError::Io(e.to_string()))?;

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proximity::{MemoryProximityStore, ProximityId, ProximityStore};

    fn record(ebid: u8, at: u64) -> LocalProximity {
        LocalProximity {
            id: ProximityId::derive(&[ebid; 8], at),
            ebid: [ebid; 8],
            ecc: [0, ebid],
            mac: vec![ebid; 4],
            time_from_hello_message: 9,
            time_collected_on_device: at,
            rssi_raw: -70,
            rssi_calibrated: -65,
            tx_power: 4,
        }
    }

    #[test]
    fn groups_by_peer() {
        let store = MemoryProximityStore::new();
        for (ebid, at) in [(2, 100), (1, 50), (2, 300), (1, 60)] {
            store.insert(&record(ebid, at)).unwrap();
        }

        let contacts = group_contacts(&store.snapshot().unwrap()).unwrap();
        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts[0].ebid, b64_encode(&[1; 8]));
        assert_eq!(contacts[0].ids.len(), 2);
        assert_eq!(contacts[1].ids.len(), 2);
        assert_eq!(contacts[1].ids[0].time_collected_on_device, unix_to_ntp(100));
        assert_eq!(contacts[1].ids[0].mac, b64_encode(&[2; 4]));
    }

    #[test]
    fn csv_has_header_and_one_row_per_record() {
        let store = MemoryProximityStore::new();
        store.insert(&record(1, 10)).unwrap();
        store.insert(&record(2, 20)).unwrap();

        let mut out = Vec::new();
        let rows = write_csv(&store.snapshot().unwrap(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(rows, 2);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER);
        assert!(lines[1].ends_with(",9,10,-70,-65,4"));
    }

    #[test]
    fn empty_snapshot_exports_nothing() {
        let store = MemoryProximityStore::new();
        assert!(group_contacts(&store.snapshot().unwrap()).unwrap().is_empty());
    }
}
