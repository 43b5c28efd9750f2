//! Request authentication MACs.
//!
//! Every authenticated request carries
//! `HMAC-SHA256(macKey, prefix || ebid || epochId || time)` where `epochId`
//! and `time` are 32-bit big-endian and `time` is in NTP seconds. The prefix
//! byte separates request kinds.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Size of a request MAC (32 bytes)
pub const MAC_SIZE: usize = 32;

/// Kind of authenticated request, selecting the MAC prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Periodic exposure status check
    Status,
    /// Unregister from the server
    Unregister,
    /// Ask the server to forget this device's exposure history
    DeleteExposureHistory,
}

impl RequestKind {
    /// Domain separation prefix byte.
    pub const fn prefix(self) -> u8 {
        match self {
            Self::Status => 0x02,
            Self::Unregister => 0x03,
            Self::DeleteExposureHistory => 0x04,
        }
    }
}

/// Compute the MAC for an authenticated request.
pub fn request_mac(
    mac_key: &[u8],
    kind: RequestKind,
    ebid: &[u8],
    epoch_id: u32,
    time_ntp: u32,
) -> [u8; MAC_SIZE] {
    let mac = keyed(mac_key, kind, ebid, epoch_id, time_ntp);
    let result = mac.finalize().into_bytes();

    let mut out = [0u8; MAC_SIZE];
    out.copy_from_slice(&result);
    out
}

/// Verify a request MAC in constant time.
pub fn verify_request_mac(
    mac_key: &[u8],
    kind: RequestKind,
    ebid: &[u8],
    epoch_id: u32,
    time_ntp: u32,
    tag: &[u8],
) -> bool {
    keyed(mac_key, kind, ebid, epoch_id, time_ntp).verify_slice(tag).is_ok()
}

fn keyed(
    mac_key: &[u8],
    kind: RequestKind,
    ebid: &[u8],
    epoch_id: u32,
    time_ntp: u32,
) -> HmacSha256 {
    let Ok(mut mac) = HmacSha256::new_from_slice(mac_key) else {
        unreachable!("HMAC-SHA256 accepts any key size");
    };
    mac.update(&[kind.prefix()]);
    mac.update(ebid);
    mac.update(&epoch_id.to_be_bytes());
    mac.update(&time_ntp.to_be_bytes());
    mac
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [0x5A; 32];
    const EBID: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];

    #[test]
    fn mac_is_deterministic() {
        let a = request_mac(&KEY, RequestKind::Status, &EBID, 10, 3_900_000_000);
        let b = request_mac(&KEY, RequestKind::Status, &EBID, 10, 3_900_000_000);
        assert_eq!(a, b);
    }

    #[test]
    fn request_kinds_are_separated() {
        let status = request_mac(&KEY, RequestKind::Status, &EBID, 10, 1);
        let unregister = request_mac(&KEY, RequestKind::Unregister, &EBID, 10, 1);
        let delete = request_mac(&KEY, RequestKind::DeleteExposureHistory, &EBID, 10, 1);

        assert_ne!(status, unregister);
        assert_ne!(status, delete);
        assert_ne!(unregister, delete);
    }

    #[test]
    fn every_field_is_bound() {
        let base = request_mac(&KEY, RequestKind::Status, &EBID, 10, 1);
        assert_ne!(base, request_mac(&KEY, RequestKind::Status, &EBID, 11, 1));
        assert_ne!(base, request_mac(&KEY, RequestKind::Status, &EBID, 10, 2));
        assert_ne!(base, request_mac(&KEY, RequestKind::Status, &[9; 8], 10, 1));
        assert_ne!(base, request_mac(&[0; 32], RequestKind::Status, &EBID, 10, 1));
    }

    #[test]
    fn verify_accepts_own_tag_and_rejects_tampering() {
        let mut tag = request_mac(&KEY, RequestKind::Unregister, &EBID, 3, 99);
        assert!(verify_request_mac(&KEY, RequestKind::Unregister, &EBID, 3, 99, &tag));

        tag[0] ^= 1;
        assert!(!verify_request_mac(&KEY, RequestKind::Unregister, &EBID, 3, 99, &tag));
    }

    #[test]
    fn message_layout_matches_manual_hmac() {
        let mut message = vec![0x02];
        message.extend_from_slice(&EBID);
        message.extend_from_slice(&7u32.to_be_bytes());
        message.extend_from_slice(&42u32.to_be_bytes());

        let mut mac = HmacSha256::new_from_slice(&KEY).unwrap();
        mac.update(&message);
        let expected = mac.finalize().into_bytes();

        let tag = request_mac(&KEY, RequestKind::Status, &EBID, 7, 42);
        assert_eq!(tag.as_slice(), expected.as_slice());
    }
}
