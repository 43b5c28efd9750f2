//! Response bodies returned by the server.

use serde::{Deserialize, Serialize};

/// Reply to a successful registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    /// Server ECDH public key (SPKI DER or SEC1), base64.
    #[serde(rename = "serverPublicECDHKey")]
    pub server_public_ecdh_key: String,

    /// Sealed initial epoch batch, base64.
    pub tuples: String,

    /// Protocol start, NTP seconds. Epoch 0 begins here.
    #[serde(rename = "timeStart")]
    pub time_start: u64,
}

/// Reply to a status check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    /// Whether a recorded contact was later reported sick.
    pub at_risk: bool,

    /// Coarse timeframe of the most recent exposure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_exposure_timeframe: Option<i64>,

    /// Optional human-readable server message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Sealed epoch material, base64. Empty when nothing new is issued.
    #[serde(default)]
    pub tuples: String,
}

/// Reply to report, unregister and delete-exposure-history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessResponse {
    /// Whether the server applied the request.
    pub success: bool,

    /// Optional human-readable server message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
