//! NTP time on the wire.
//!
//! The protocol counts seconds from 1900-01-01 (NTP era 0). Local records use
//! Unix seconds and are converted at the wire boundary.

use crate::{
    codec::{b64_decode_exact, b64_encode},
    error::ProtoError,
};

/// Seconds between 1900-01-01 and 1970-01-01.
pub const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// Unix seconds to NTP seconds, saturating at `u64::MAX`.
pub const fn unix_to_ntp(unix_secs: u64) -> u64 {
    unix_secs.saturating_add(NTP_UNIX_OFFSET)
}

/// NTP seconds to Unix seconds. `None` for times before 1970.
pub const fn ntp_to_unix(ntp_secs: u64) -> Option<u64> {
    ntp_secs.checked_sub(NTP_UNIX_OFFSET)
}

/// Low 32 bits of the NTP seconds for a Unix time, as carried in MACs.
pub const fn ntp_time32(unix_secs: u64) -> u32 {
    unix_to_ntp(unix_secs) as u32
}

/// Encode a 32-bit NTP time as the base64 `time` field.
pub fn encode_time(time_ntp: u32) -> String {
    b64_encode(&time_ntp.to_be_bytes())
}

/// Decode the base64 `time` field.
pub fn decode_time(value: &str) -> Result<u32, ProtoError> {
    b64_decode_exact::<4>("time", value).map(u32::from_be_bytes)
}
