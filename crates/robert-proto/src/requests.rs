//! Request bodies sent by the client.

use serde::{Deserialize, Serialize};

use crate::contacts::ContactPayload;

/// `POST /register`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Captcha answer typed by the user.
    pub captcha: String,

    /// Identifier of the captcha challenge.
    #[serde(rename = "captchaId")]
    pub captcha_id: String,

    /// Ephemeral ECDH public key, SPKI DER, base64.
    #[serde(rename = "clientPublicECDHKey")]
    pub client_public_ecdh_key: String,
}

/// `POST /status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRequest {
    /// Current EBID, base64.
    pub ebid: String,

    /// Epoch the EBID belongs to.
    #[serde(rename = "epochId")]
    pub epoch_id: u32,

    /// NTP time of the request, base64 of 4 bytes.
    pub time: String,

    /// Request MAC, base64.
    pub mac: String,

    /// Local contact export.
    #[serde(flatten)]
    pub contacts: ContactPayload,
}

/// `POST /report`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRequest {
    /// Self-declared verification code.
    pub token: String,

    /// Local contact export.
    #[serde(flatten)]
    pub contacts: ContactPayload,
}

/// `POST /unregister`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnregisterRequest {
    /// Epoch the EBID belongs to.
    #[serde(rename = "epochId")]
    pub epoch_id: u32,

    /// Current EBID, base64.
    pub ebid: String,

    /// NTP time of the request, base64 of 4 bytes.
    pub time: String,

    /// Request MAC, base64.
    pub mac: String,
}

/// `POST /deleteExposureHistory`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteExposureHistoryRequest {
    /// Current EBID, base64.
    pub ebid: String,

    /// NTP time of the request, base64 of 4 bytes.
    pub time: String,

    /// Request MAC, base64.
    pub mac: String,
}
