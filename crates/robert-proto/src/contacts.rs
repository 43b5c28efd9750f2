//! Contact records on the wire.
//!
//! Receptions are grouped by the peer's `(ebid, ecc)` so the server can
//! decrypt each peer identifier once. Each reception becomes a [`ContactId`].

use serde::{Deserialize, Serialize};

use crate::{
    codec::{b64_decode, b64_encode},
    error::ProtoError,
};

/// One reception of a peer's HELLO message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactId {
    /// Local receipt time, NTP seconds.
    pub time_collected_on_device: u64,

    /// Time advertised by the peer inside the HELLO message (16 bits).
    pub time_from_hello_message: u16,

    /// HELLO MAC, base64.
    pub mac: String,

    /// Raw RSSI reading.
    pub rssi_raw: i32,

    /// RSSI corrected for device calibration.
    pub rssi_calibrated: i32,
}

/// All receptions of one peer identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Peer EBID, base64.
    pub ebid: String,

    /// Peer ECC, base64.
    pub ecc: String,

    /// Individual receptions.
    pub ids: Vec<ContactId>,
}

/// Which of the two contact encodings a request carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContactEncoding {
    /// Structured JSON list in `contacts`
    #[default]
    Json,
    /// Base64 CBOR blob in `contactsAsBinary`
    Binary,
}

/// Contact export embedded in a request. Exactly one field is emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactPayload {
    /// `contacts: [Contact]`
    #[serde(rename = "contacts")]
    List(Vec<Contact>),

    /// `contactsAsBinary: base64`
    #[serde(rename = "contactsAsBinary")]
    Binary(String),
}

impl ContactPayload {
    /// Build the payload in the negotiated encoding.
    pub fn encode(contacts: Vec<Contact>, encoding: ContactEncoding) -> Result<Self, ProtoError> {
        match encoding {
            ContactEncoding::Json => Ok(Self::List(contacts)),
            ContactEncoding::Binary => encode_contacts_binary(&contacts).map(Self::Binary),
        }
    }

    /// Recover the contact list regardless of encoding.
    pub fn into_contacts(self) -> Result<Vec<Contact>, ProtoError> {
        match self {
            Self::List(contacts) => Ok(contacts),
            Self::Binary(blob) => decode_contacts_binary(&blob),
        }
    }
}

/// Encode contacts as base64 CBOR.
pub fn encode_contacts_binary(contacts: &[Contact]) -> Result<String, ProtoError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(contacts, &mut bytes).map_err(|e| ProtoError::Cbor(e.to_string()))?;
    Ok(b64_encode(&bytes))
}

/// Decode a `contactsAsBinary` blob.
pub fn decode_contacts_binary(blob: &str) -> Result<Vec<Contact>, ProtoError> {
    let bytes = b64_decode("contactsAsBinary", blob)?;
    ciborium::from_reader(bytes.as_slice()).map_err(|e| ProtoError::Cbor(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Contact> {
        vec![Contact {
            ebid: b64_encode(&[1; 8]),
            ecc: b64_encode(&[2; 2]),
            ids: vec![ContactId {
                time_collected_on_device: 3_800_000_000,
                time_from_hello_message: 512,
                mac: b64_encode(&[3; 5]),
                rssi_raw: -60,
                rssi_calibrated: -55,
            }],
        }]
    }

    #[test]
    fn binary_payload_recovers_contacts() {
        let payload = ContactPayload::encode(sample(), ContactEncoding::Binary).unwrap();
        assert!(matches!(payload, ContactPayload::Binary(_)));
        assert_eq!(payload.into_contacts().unwrap(), sample());
    }

    #[test]
    fn corrupt_blob_is_rejected() {
        let err = decode_contacts_binary(&b64_encode(&[0xFF, 0x00])).unwrap_err();
        assert!(matches!(err, ProtoError::Cbor(_)));
    }
}
