//! HTTPS transport with certificate pinning.
//!
//! Provides [`HttpsServerApi`], a [`ServerApi`] that POSTs JSON bodies over
//! TLS. The server's leaf certificate must be byte-identical to the pinned
//! certificate; any other certificate aborts the handshake, no matter which
//! CA signed it. Protocol logic stays in [`Session`](crate::Session).

use std::{error::Error as StdError, io, sync::Arc, time::Duration};

use async_trait::async_trait;
use robert_proto::{
    DeleteExposureHistoryRequest, RegisterRequest, RegisterResponse, ReportRequest,
    StatusRequest, StatusResponse, SuccessResponse, UnregisterRequest,
};
use rustls::{
    CertificateError, DigitallySignedStruct, SignatureScheme,
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    crypto::{
        CryptoProvider, WebPkiSupportedAlgorithms, verify_tls12_signature, verify_tls13_signature,
    },
    pki_types::{CertificateDer, ServerName, UnixTime},
};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::{api::ServerApi, error::ApiError};

/// Transport construction errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Pinned certificate could not be loaded.
    #[error("invalid pinned certificate: {0}")]
    InvalidCertificate(String),

    /// TLS or HTTP client setup failed.
    #[error("client setup failed: {0}")]
    Setup(String),
}

/// HTTPS endpoint configuration.
#[derive(Debug, Clone)]
pub struct HttpsConfig {
    /// Base URL of the API, e.g. `https://host/api/v1`
    pub base_url: String,
    /// DER of the only leaf certificate accepted
    pub pinned_certificate: CertificateDer<'static>,
    /// Per-request deadline enforced by the HTTP client
    pub request_timeout: Duration,
}

/// Read the first certificate from a PEM bundle.
pub fn load_pinned_certificate(pem: &[u8]) -> Result<CertificateDer<'static>, TransportError> {
    let mut reader = pem;
    match rustls_pemfile::certs(&mut reader).next() {
        Some(Ok(cert)) => Ok(cert),
        Some(Err(e)) => Err(TransportError::InvalidCertificate(e.to_string())),
        None => Err(TransportError::InvalidCertificate("no certificate in PEM".into())),
    }
}

/// [`ServerApi`] over pinned HTTPS.
#[derive(Clone)]
pub struct HttpsServerApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpsServerApi {
    /// Build a client that only trusts `config.pinned_certificate`.
    pub fn new(config: HttpsConfig) -> Result<Self, TransportError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let verifier = PinnedCertVerifier::new(config.pinned_certificate, &provider);

        let tls = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| TransportError::Setup(e.to_string()))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_no_client_auth();

        let client = reqwest::Client::builder()
            .use_preconfigured_tls(tls)
            .https_only(true)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TransportError::Setup(e.to_string()))?;

        Ok(Self { client, base_url: config.base_url.trim_end_matches('/').to_owned() })
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, ApiError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let body = robert_proto::encode(body).map_err(|e| ApiError::Encode(e.to_string()))?;
        let url = format!("{}/{path}", self.base_url);

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(classify)?;
        tracing::debug!(%url, status = status.as_u16(), "server exchange");

        if !status.is_success() {
            return Err(ApiError::Rejected {
                status: status.as_u16(),
                message: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        robert_proto::decode(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ServerApi for HttpsServerApi {
    async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, ApiError> {
        self.post("register", request).await
    }

    async fn status(&self, request: &StatusRequest) -> Result<StatusResponse, ApiError> {
        self.post("status", request).await
    }

    async fn report(&self, request: &ReportRequest) -> Result<SuccessResponse, ApiError> {
        self.post("report", request).await
    }

    async fn unregister(&self, request: &UnregisterRequest) -> Result<SuccessResponse, ApiError> {
        self.post("unregister", request).await
    }

    async fn delete_exposure_history(
        &self,
        request: &DeleteExposureHistoryRequest,
    ) -> Result<SuccessResponse, ApiError> {
        self.post("deleteExposureHistory", request).await
    }
}

fn classify(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        return ApiError::Timeout;
    }

    let mut source: Option<&(dyn StdError + 'static)> = Some(&err);
    while let Some(current) = source {
        if is_pin_mismatch(current) {
            return ApiError::CertificatePinning;
        }
        source = current.source();
    }

    ApiError::Connection(err.to_string())
}

/// rustls errors reach us wrapped in `io::Error`, whose `source()` skips the
/// wrapped value, so both layers are inspected.
fn is_pin_mismatch(err: &(dyn StdError + 'static)) -> bool {
    let tls = err.downcast_ref::<rustls::Error>().or_else(|| {
        err.downcast_ref::<io::Error>()
            .and_then(io::Error::get_ref)
            .and_then(|inner| inner.downcast_ref::<rustls::Error>())
    });
    matches!(
        tls,
        Some(rustls::Error::InvalidCertificate(CertificateError::ApplicationVerificationFailure))
    )
}

/// Accepts exactly one leaf certificate. Handshake signatures are still
/// verified against that certificate's key.
#[derive(Debug)]
struct PinnedCertVerifier {
    pinned: CertificateDer<'static>,
    algorithms: WebPkiSupportedAlgorithms,
}

impl PinnedCertVerifier {
    fn new(pinned: CertificateDer<'static>, provider: &CryptoProvider) -> Self {
        Self { pinned, algorithms: provider.signature_verification_algorithms }
    }
}

impl ServerCertVerifier for PinnedCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if end_entity.as_ref() == self.pinned.as_ref() {
            Ok(ServerCertVerified::assertion())
        } else {
            tracing::warn!("server presented a certificate that does not match the pin");
            Err(rustls::Error::InvalidCertificate(CertificateError::ApplicationVerificationFailure))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
