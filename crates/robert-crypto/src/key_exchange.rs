//! Ephemeral ECDH key exchange and registration secret derivation.
//!
//! A fresh P-256 key pair is generated for every registration attempt. The
//! public half is sent to the server; the private half is held by an opaque
//! [`LocalPrivateKey`] that can only perform one agreement.

use std::fmt;

use hmac::{Hmac, Mac};
use p256::{
    FieldBytes, NonZeroScalar, PublicKey,
    ecdh::diffie_hellman,
    pkcs8::{DecodePublicKey, EncodePublicKey},
};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// Label for the request authentication key
const MAC_KEY_LABEL: &[u8] = b"mac";

/// Label for the epoch tuple encryption key
const ENC_KEY_LABEL: &[u8] = b"tuples";

/// Size of each derived registration secret (32 bytes)
pub const SECRET_KEY_SIZE: usize = 32;

/// Candidate scalars drawn before giving up. A uniformly random 32-byte string
/// is out of range with probability ~2^-32, so hitting this means the random
/// source is broken.
const MAX_KEYGEN_ATTEMPTS: usize = 4;

/// Long-lived secrets shared with the server after registration.
///
/// Never transmitted. Zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistrationSecrets {
    mac_key: [u8; SECRET_KEY_SIZE],
    enc_key: [u8; SECRET_KEY_SIZE],
}

impl RegistrationSecrets {
    /// Rebuild secrets from persisted key material.
    pub fn from_keys(mac_key: [u8; SECRET_KEY_SIZE], enc_key: [u8; SECRET_KEY_SIZE]) -> Self {
        Self { mac_key, enc_key }
    }

    /// Key used to authenticate status, unregister and delete requests.
    pub fn mac_key(&self) -> &[u8; SECRET_KEY_SIZE] {
        &self.mac_key
    }

    /// Key used to decrypt epoch tuples issued by the server.
    pub fn enc_key(&self) -> &[u8; SECRET_KEY_SIZE] {
        &self.enc_key
    }
}

impl fmt::Debug for RegistrationSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationSecrets").finish_non_exhaustive()
    }
}

impl Drop for RegistrationSecrets {
    fn drop(&mut self) {
        self.mac_key.zeroize();
        self.enc_key.zeroize();
    }
}

/// Opaque handle to an ephemeral private key.
///
/// Supports agreement only. There is no accessor for the scalar.
pub struct LocalPrivateKey {
    scalar: NonZeroScalar,
}

impl LocalPrivateKey {
    /// Raw ECDH agreement with a remote public key.
    fn agree(&self, remote: &PublicKey) -> SharedSecret {
        let shared = diffie_hellman(&self.scalar, remote.as_affine());
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(shared.raw_secret_bytes());
        SharedSecret(bytes)
    }
}

impl fmt::Debug for LocalPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LocalPrivateKey(..)")
    }
}

impl Drop for LocalPrivateKey {
    fn drop(&mut self) {
        self.scalar.zeroize();
    }
}

struct SharedSecret([u8; 32]);

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Ephemeral key pair for one registration attempt.
#[derive(Debug)]
pub struct KeyPair {
    public_key: PublicKey,
    private_key: LocalPrivateKey,
}

impl KeyPair {
    /// Generate a key pair from caller-provided randomness.
    ///
    /// `fill_random` must produce cryptographically secure bytes in
    /// production; tests pass a seeded source.
    ///
    /// # Errors
    ///
    /// - `CryptoError::KeyGenerationFailed` if no candidate is a valid scalar
    pub fn generate(mut fill_random: impl FnMut(&mut [u8])) -> Result<Self, CryptoError> {
        for _ in 0..MAX_KEYGEN_ATTEMPTS {
            let mut candidate = [0u8; 32];
            fill_random(&mut candidate);

            let scalar: Option<NonZeroScalar> =
                NonZeroScalar::from_repr(FieldBytes::from(candidate)).into();
            candidate.zeroize();

            if let Some(scalar) = scalar {
                let public_key = PublicKey::from_secret_scalar(&scalar);
                return Ok(Self { public_key, private_key: LocalPrivateKey { scalar } });
            }
        }

        Err(CryptoError::KeyGenerationFailed { attempts: MAX_KEYGEN_ATTEMPTS })
    }

    /// Public key in SubjectPublicKeyInfo DER form (the interchange encoding).
    pub fn public_key_der(&self) -> Result<Vec<u8>, CryptoError> {
        self.public_key
            .to_public_key_der()
            .map(|doc| doc.as_bytes().to_vec())
            .map_err(|e| CryptoError::KeyEncoding { reason: e.to_string() })
    }

    /// Public key as an uncompressed SEC1 point.
    pub fn public_key_sec1(&self) -> Vec<u8> {
        self.public_key.to_sec1_bytes().to_vec()
    }

    /// Split off the private key handle.
    pub fn into_private_key(self) -> LocalPrivateKey {
        self.private_key
    }
}

/// Derive registration secrets from an agreement with the server key.
///
/// Consumes the private key: a failed exchange requires a fresh key pair.
///
/// # Errors
///
/// - `CryptoError::InvalidRemoteKey` if `remote_public_key` is neither SPKI DER
///   nor a SEC1 point on P-256
/// - `CryptoError::KeyAgreementFailed` if the agreement yields an all-zero
///   secret
pub fn derive_secrets(
    local: LocalPrivateKey,
    remote_public_key: &[u8],
) -> Result<RegistrationSecrets, CryptoError> {
    let remote = parse_public_key(remote_public_key)?;
    let shared = local.agree(&remote);

    if shared.0.iter().all(|&b| b == 0) {
        return Err(CryptoError::KeyAgreementFailed);
    }

    Ok(derive_secrets_from_shared(&shared.0))
}

/// Derive `macKey`/`encKey` from an already agreed shared secret.
pub fn derive_secrets_from_shared(shared_secret: &[u8]) -> RegistrationSecrets {
    RegistrationSecrets {
        mac_key: labelled_hmac(shared_secret, MAC_KEY_LABEL),
        enc_key: labelled_hmac(shared_secret, ENC_KEY_LABEL),
    }
}

fn labelled_hmac(key: &[u8], label: &[u8]) -> [u8; SECRET_KEY_SIZE] {
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        unreachable!("HMAC-SHA256 accepts any key size");
    };
    mac.update(label);
    let result = mac.finalize().into_bytes();

    let mut out = [0u8; SECRET_KEY_SIZE];
    out.copy_from_slice(&result);
    out
}

fn parse_public_key(bytes: &[u8]) -> Result<PublicKey, CryptoError> {
    PublicKey::from_public_key_der(bytes)
        .or_else(|der_err| {
            PublicKey::from_sec1_bytes(bytes).map_err(|sec1_err| CryptoError::InvalidRemoteKey {
                reason: format!("not SPKI ({der_err}) nor SEC1 ({sec1_err})"),
            })
        })
}
