//! Fuzz target for sealed epoch material
//!
//! # Strategy
//!
//! - Raw: arbitrary bytes opened under an arbitrary key
//! - Sealed: arbitrary plaintext sealed under a known key, optionally with one
//!   flipped bit, then opened and parsed into epochs
//!
//! # Invariants
//!
//! - Opening never panics, whatever the length
//! - A flipped bit always fails authentication
//! - Decoded tuples convert to epochs or fail with an error, never a panic

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use robert_core::Epoch;
use robert_crypto::{open_tuples, seal_tuples};
use robert_proto::tuples::decode_tuples;

#[derive(Debug, Arbitrary)]
enum Input {
    Raw { key: [u8; 32], sealed: Vec<u8> },
    Sealed { key: [u8; 32], nonce: [u8; 12], plaintext: Vec<u8>, flip: Option<u16> },
}

fuzz_target!(|input: Input| {
    match input {
        Input::Raw { key, sealed } => {
            if let Ok(plaintext) = open_tuples(&key, &sealed) {
                parse(&plaintext);
            }
        },
        Input::Sealed { key, nonce, plaintext, flip } => {
            let mut sealed = seal_tuples(&key, &plaintext, nonce);
            match flip {
                Some(bit) => {
                    let index = usize::from(bit / 8) % sealed.len();
                    sealed[index] ^= 1 << (bit % 8);
                    assert!(open_tuples(&key, &sealed).is_err(), "tampered tuples opened");
                },
                None => {
                    let opened = open_tuples(&key, &sealed).expect("sealed tuples must open");
                    assert_eq!(opened, plaintext);
                    parse(&opened);
                },
            }
        },
    }
});

fn parse(plaintext: &[u8]) {
    if let Ok(tuples) = decode_tuples(plaintext) {
        for tuple in &tuples {
            let _ = Epoch::from_tuple(tuple);
        }
    }
}
