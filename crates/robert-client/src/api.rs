//! Server exchange abstraction.

use async_trait::async_trait;
use robert_proto::{
    DeleteExposureHistoryRequest, RegisterRequest, RegisterResponse, ReportRequest,
    StatusRequest, StatusResponse, SuccessResponse, UnregisterRequest,
};

use crate::error::ApiError;

/// One request/response exchange per protocol operation.
///
/// Implementations perform transport only: they never retry, never time
/// out on their own behalf (the session bounds every call), and report
/// non-success HTTP statuses as [`ApiError::Rejected`].
#[async_trait]
pub trait ServerApi: Send + Sync + 'static {
    /// `POST register`
    async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, ApiError>;

    /// `POST status`
    async fn status(&self, request: &StatusRequest) -> Result<StatusResponse, ApiError>;

    /// `POST report`
    async fn report(&self, request: &ReportRequest) -> Result<SuccessResponse, ApiError>;

    /// `POST unregister`
    async fn unregister(&self, request: &UnregisterRequest) -> Result<SuccessResponse, ApiError>;

    /// `POST deleteExposureHistory`
    async fn delete_exposure_history(
        &self,
        request: &DeleteExposureHistoryRequest,
    ) -> Result<SuccessResponse, ApiError>;
}
