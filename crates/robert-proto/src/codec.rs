//! JSON body and base64 field helpers.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::ProtoError;

/// Encode a body as compact JSON.
pub fn encode<T: Serialize>(body: &T) -> Result<Vec<u8>, ProtoError> {
    Ok(serde_json::to_vec(body)?)
}

/// Decode a JSON body.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtoError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Standard base64 with padding.
pub fn b64_encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode a base64 field, naming the field on failure.
pub fn b64_decode(field: &'static str, value: &str) -> Result<Vec<u8>, ProtoError> {
    STANDARD.decode(value).map_err(|e| ProtoError::Base64 { field, reason: e.to_string() })
}

/// Decode a base64 field that must have an exact length.
pub fn b64_decode_exact<const N: usize>(
    field: &'static str,
    value: &str,
) -> Result<[u8; N], ProtoError> {
    let bytes = b64_decode(field, value)?;
    <[u8; N]>::try_from(bytes.as_slice()).map_err(|_| ProtoError::InvalidLength {
        field,
        expected: N,
        got: bytes.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_decode_checks_length() {
        let encoded = b64_encode(&[1, 2, 3]);
        assert_eq!(b64_decode_exact::<3>("ebid", &encoded).unwrap(), [1, 2, 3]);
        assert_eq!(
            b64_decode_exact::<8>("ebid", &encoded),
            Err(ProtoError::InvalidLength { field: "ebid", expected: 8, got: 3 })
        );
    }

    #[test]
    fn invalid_base64_names_field() {
        let err = b64_decode("mac", "***").unwrap_err();
        assert!(matches!(err, ProtoError::Base64 { field: "mac", .. }));
    }
}
