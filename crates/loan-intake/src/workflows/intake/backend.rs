use async_trait::async_trait;

use super::domain::{ApplicationId, ApplicationRecord};
use super::statement::{StatementCheckRequest, StatementCheckResponse};
use super::sync::ApplicationPatch;

/// Backend collaborator consumed by the intake wizard.
///
/// Implementations talk to the loan backend (see [`super::http::HttpIntakeBackend`])
/// or keep records in memory for demos and tests.
#[async_trait]
pub trait IntakeBackend: Send + Sync {
    async fn get_application(&self, id: &ApplicationId)
        -> Result<ApplicationRecord, BackendError>;

    /// Merge-patch the record and return the fully merged result.
    async fn update_application(
        &self,
        id: &ApplicationId,
        patch: &ApplicationPatch,
    ) -> Result<ApplicationRecord, BackendError>;

    async fn check_statement(
        &self,
        request: &StatementCheckRequest,
    ) -> Result<StatementCheckResponse, BackendError>;

    /// Issue a one-time password. The code is delivered out of band and never returned.
    async fn send_otp(&self, id: &ApplicationId) -> Result<(), BackendError>;

    async fn verify_otp(&self, id: &ApplicationId, code: &str) -> Result<(), BackendError>;
}

/// Failure talking to the backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("request to {endpoint} failed: {reason}")]
    Transport { endpoint: String, reason: String },
    #[error("{endpoint} returned {status}: {body}")]
    Api {
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("failed to decode response from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("application not found")]
    NotFound,
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}
