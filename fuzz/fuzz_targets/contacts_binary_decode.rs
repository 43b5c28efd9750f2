//! Fuzz target for the binary contact export
//!
//! The base64 CBOR blob is decoded by the server side of the harness and by
//! any tool inspecting exports.
//!
//! # Invariants
//!
//! - Arbitrary strings never panic the decoder
//! - Huge claimed CBOR lengths are rejected, not allocated
//! - Decoded contact lists survive a re-encode unchanged

#![no_main]

use libfuzzer_sys::fuzz_target;
use robert_proto::contacts::{decode_contacts_binary, encode_contacts_binary};

fuzz_target!(|data: &[u8]| {
    let Ok(blob) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(contacts) = decode_contacts_binary(blob) {
        let encoded = encode_contacts_binary(&contacts).expect("decoded contacts must re-encode");
        let decoded = decode_contacts_binary(&encoded).expect("re-encoded contacts must decode");
        assert_eq!(contacts, decoded);
    }
});
