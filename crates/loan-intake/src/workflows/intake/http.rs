//! HTTP adapter for the loan backend.
//!
//! Wraps a `reqwest::Client` with the backend base URL and a per-request timeout.
//! The bearer token is read from an injected [`CredentialSource`] on every
//! request, so a host can rotate session tokens without rebuilding the client.
//! Retries are not built in; a failed call surfaces as a [`BackendError`] and the
//! wizard decides whether it is fatal.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::backend::{BackendError, IntakeBackend};
use super::domain::{ApplicationId, ApplicationRecord};
use super::statement::{StatementCheckRequest, StatementCheckResponse};
use super::sync::ApplicationPatch;

/// Supplies the session token attached to backend calls.
pub trait CredentialSource: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

/// Fixed token, typically from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub Option<String>);

impl CredentialSource for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Configuration for [`HttpIntakeBackend`].
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    /// Base URL of the loan API, e.g. `https://api.example.kz/v1`.
    pub base_url: String,
    /// Request timeout in seconds (default: 30).
    pub timeout_secs: u64,
}

impl HttpBackendConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_secs: 30,
        }
    }
}

pub struct HttpIntakeBackend {
    client: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialSource>,
}

#[derive(Debug, Serialize)]
struct VerifyOtpBody<'a> {
    code: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct OtpEnvelope {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    message: Option<String>,
}

impl HttpIntakeBackend {
    pub fn new(
        config: HttpBackendConfig,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BackendError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn application_url(&self, id: &ApplicationId, suffix: &str) -> String {
        format!("{}/applications/{}{}", self.base_url, id.0, suffix)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.credentials.bearer_token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send a request, mapping transport failures and non-2xx statuses.
    async fn send(&self, request: RequestBuilder, endpoint: &str) -> Result<Response, BackendError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| BackendError::Transport {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(BackendError::NotFound);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Api {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn decode<T: DeserializeOwned>(
        response: Response,
        endpoint: &str,
    ) -> Result<T, BackendError> {
        response.json::<T>().await.map_err(|e| BackendError::Decode {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })
    }

    /// OTP endpoints may answer with an empty body or a `{ "success": false }` envelope.
    async fn expect_otp_success(response: Response) -> Result<(), BackendError> {
        let body = response.text().await.unwrap_or_default();
        if body.trim().is_empty() {
            return Ok(());
        }
        let envelope: OtpEnvelope = serde_json::from_str(&body).unwrap_or_default();
        match envelope.success {
            Some(false) => Err(BackendError::Rejected(
                envelope
                    .message
                    .unwrap_or_else(|| "code rejected".to_string()),
            )),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl IntakeBackend for HttpIntakeBackend {
    async fn get_application(
        &self,
        id: &ApplicationId,
    ) -> Result<ApplicationRecord, BackendError> {
        let url = self.application_url(id, "");
        let response = self.send(self.client.get(&url), "get_application").await?;
        Self::decode(response, "get_application").await
    }

    async fn update_application(
        &self,
        id: &ApplicationId,
        patch: &ApplicationPatch,
    ) -> Result<ApplicationRecord, BackendError> {
        let url = self.application_url(id, "");
        let response = self
            .send(self.client.patch(&url).json(patch), "update_application")
            .await?;
        Self::decode(response, "update_application").await
    }

    async fn check_statement(
        &self,
        request: &StatementCheckRequest,
    ) -> Result<StatementCheckResponse, BackendError> {
        let url = self.application_url(&request.application_id, "/statement");
        let file = Part::bytes(request.document.bytes().to_vec())
            .file_name(request.document.file_name().to_string())
            .mime_str("application/pdf")
            .map_err(|e| BackendError::Transport {
                endpoint: "check_statement".to_string(),
                reason: e.to_string(),
            })?;
        let form = Form::new()
            .text("bankId", request.bank_id.0.clone())
            .text("iin", request.iin.clone())
            .text("applicationId", request.application_id.0.clone())
            .part("file", file);

        let response = self
            .authorize(self.client.post(&url).multipart(form))
            .send()
            .await
            .map_err(|e| BackendError::Transport {
                endpoint: "check_statement".to_string(),
                reason: e.to_string(),
            })?;

        // The verification service reports business failures inside the envelope,
        // sometimes with a 4xx status. Decode whenever the body is an envelope.
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<StatementCheckResponse>(&body) {
            Ok(envelope) => Ok(envelope),
            Err(_) if !status.is_success() => Err(BackendError::Api {
                endpoint: "check_statement".to_string(),
                status: status.as_u16(),
                body,
            }),
            Err(e) => Err(BackendError::Decode {
                endpoint: "check_statement".to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn send_otp(&self, id: &ApplicationId) -> Result<(), BackendError> {
        let url = self.application_url(id, "/otp/send");
        let response = self.send(self.client.post(&url), "send_otp").await?;
        Self::expect_otp_success(response).await
    }

    async fn verify_otp(&self, id: &ApplicationId, code: &str) -> Result<(), BackendError> {
        let url = self.application_url(id, "/otp/verify");
        let response = self
            .send(
                self.client.post(&url).json(&VerifyOtpBody { code }),
                "verify_otp",
            )
            .await?;
        Self::expect_otp_success(response).await
    }
}
