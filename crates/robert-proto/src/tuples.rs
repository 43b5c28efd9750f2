//! Decrypted epoch material.
//!
//! After AES-GCM opening, `tuples` is a JSON list of per-epoch keys.

use serde::{Deserialize, Serialize};

use crate::error::ProtoError;

/// Broadcast material for one epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochKey {
    /// EBID, base64.
    pub ebid: String,

    /// ECC, base64.
    pub ecc: String,
}

/// One entry of the decrypted tuples list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpochTuple {
    /// Epoch number assigned by the server.
    pub epoch_id: u32,

    /// Broadcast material for the epoch.
    pub key: EpochKey,
}

/// Parse a decrypted tuples plaintext.
pub fn decode_tuples(plaintext: &[u8]) -> Result<Vec<EpochTuple>, ProtoError> {
    Ok(serde_json::from_slice(plaintext)?)
}

/// Serialize tuples before sealing (server side).
pub fn encode_tuples(tuples: &[EpochTuple]) -> Result<Vec<u8>, ProtoError> {
    Ok(serde_json::to_vec(tuples)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_server_layout() {
        let plaintext = br#"[{"epochId":4242,"key":{"ebid":"AQIDBAUGBwg=","ecc":"qrs="}}]"#;
        let tuples = decode_tuples(plaintext).unwrap();

        assert_eq!(tuples.len(), 1);
        assert_eq!(tuples[0].epoch_id, 4242);
        assert_eq!(tuples[0].key.ebid, "AQIDBAUGBwg=");
    }

    #[test]
    fn rejects_non_list() {
        assert!(decode_tuples(br#"{"epochId":1}"#).is_err());
    }
}
