//! Fuzz target for server response bodies
//!
//! Response bodies arrive from the network and are parsed before any
//! authentication takes place.
//!
//! # Invariants
//!
//! - Decoding arbitrary bytes into any response type never panics
//! - A body that decodes re-encodes and decodes to the same value

#![no_main]

use libfuzzer_sys::fuzz_target;
use robert_proto::{RegisterResponse, StatusResponse, SuccessResponse, decode, encode};

fn check<T>(data: &[u8])
where
    T: serde::Serialize + serde::de::DeserializeOwned + PartialEq + std::fmt::Debug,
{
    if let Ok(value) = decode::<T>(data) {
        let bytes = encode(&value).expect("decoded value must re-encode");
        let again = decode::<T>(&bytes).expect("re-encoded value must decode");
        assert_eq!(value, again);
    }
}

fuzz_target!(|data: &[u8]| {
    check::<RegisterResponse>(data);
    check::<StatusResponse>(data);
    check::<SuccessResponse>(data);
});
