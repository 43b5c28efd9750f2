//! Epoch tuple sealing with AES-256-GCM.
//!
//! The server issues epoch material as `nonce(12) || ciphertext || tag(16)`
//! encrypted under `encKey`. All functions are pure; the sealing nonce is
//! provided by the caller.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};

use crate::error::CryptoError;

/// Size of the AES-GCM nonce prefix (12 bytes)
pub const TUPLES_NONCE_SIZE: usize = 12;

/// GCM tag size (16 bytes)
const GCM_TAG_SIZE: usize = 16;

/// Decrypt a sealed tuples blob.
///
/// # Errors
///
/// - `CryptoError::TuplesTooShort` if the blob cannot hold nonce and tag
/// - `CryptoError::DecryptionFailed` if authentication fails
pub fn open_tuples(enc_key: &[u8; 32], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < TUPLES_NONCE_SIZE + GCM_TAG_SIZE {
        return Err(CryptoError::TuplesTooShort { len: sealed.len() });
    }

    let (nonce, ciphertext) = sealed.split_at(TUPLES_NONCE_SIZE);
    let cipher = Aes256Gcm::new(enc_key.into());

    cipher.decrypt(Nonce::from_slice(nonce), ciphertext).map_err(|_| CryptoError::DecryptionFailed)
}

/// Seal a tuples plaintext (server side, and tests).
pub fn seal_tuples(
    enc_key: &[u8; 32],
    plaintext: &[u8],
    nonce: [u8; TUPLES_NONCE_SIZE],
) -> Vec<u8> {
    let cipher = Aes256Gcm::new(enc_key.into());

    let Ok(ciphertext) = cipher.encrypt(Nonce::from_slice(&nonce), plaintext) else {
        unreachable!("AES-GCM encryption cannot fail for in-memory plaintext");
    };

    let mut sealed = Vec::with_capacity(TUPLES_NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    sealed
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [0x33; 32];

    #[test]
    fn open_recovers_sealed_plaintext() {
        let sealed = seal_tuples(&KEY, b"[]", [7; 12]);
        assert_eq!(sealed.len(), 12 + 2 + 16);
        assert_eq!(open_tuples(&KEY, &sealed).unwrap(), b"[]");
    }

    #[test]
    fn wrong_key_is_rejected() {
        let sealed = seal_tuples(&KEY, b"epoch material", [1; 12]);
        assert_eq!(open_tuples(&[0x34; 32], &sealed), Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let mut sealed = seal_tuples(&KEY, b"epoch material", [1; 12]);
        let last = sealed.len() - 1;
        sealed[last] ^= 0x80;
        assert_eq!(open_tuples(&KEY, &sealed), Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn short_blob_is_rejected() {
        assert_eq!(open_tuples(&KEY, &[0; 27]), Err(CryptoError::TuplesTooShort { len: 27 }));
    }
}
