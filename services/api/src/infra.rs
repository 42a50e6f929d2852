use async_trait::async_trait;
use chrono::Utc;
use loan_intake::config::BackendConfig;
use loan_intake::workflows::intake::{
    ApplicationId, ApplicationPatch, ApplicationRecord, BackendError, HttpBackendConfig,
    HttpIntakeBackend, IntakeBackend, StatementCheckData, StatementCheckRequest,
    StatementCheckResponse, StaticToken,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

/// Code the in-memory backend accepts for every application.
pub(crate) const DEMO_OTP_CODE: &str = "123456";

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Backend the service talks to, chosen from configuration at startup.
pub(crate) enum ServiceBackend {
    Http(HttpIntakeBackend),
    InMemory(InMemoryIntakeBackend),
}

impl ServiceBackend {
    pub(crate) fn from_config(config: &BackendConfig) -> Result<Self, BackendError> {
        match &config.base_url {
            Some(base_url) => {
                let http = HttpBackendConfig {
                    base_url: base_url.clone(),
                    timeout_secs: config.timeout_secs,
                };
                let token = Arc::new(StaticToken(config.api_token.clone()));
                Ok(Self::Http(HttpIntakeBackend::new(http, token)?))
            }
            None => Ok(Self::InMemory(InMemoryIntakeBackend::seeded())),
        }
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            ServiceBackend::Http(_) => "http",
            ServiceBackend::InMemory(_) => "in-memory",
        }
    }

    fn inner(&self) -> &dyn IntakeBackend {
        match self {
            ServiceBackend::Http(backend) => backend,
            ServiceBackend::InMemory(backend) => backend,
        }
    }
}

#[async_trait]
impl IntakeBackend for ServiceBackend {
    async fn get_application(
        &self,
        id: &ApplicationId,
    ) -> Result<ApplicationRecord, BackendError> {
        self.inner().get_application(id).await
    }

    async fn update_application(
        &self,
        id: &ApplicationId,
        patch: &ApplicationPatch,
    ) -> Result<ApplicationRecord, BackendError> {
        self.inner().update_application(id, patch).await
    }

    async fn check_statement(
        &self,
        request: &StatementCheckRequest,
    ) -> Result<StatementCheckResponse, BackendError> {
        self.inner().check_statement(request).await
    }

    async fn send_otp(&self, id: &ApplicationId) -> Result<(), BackendError> {
        self.inner().send_otp(id).await
    }

    async fn verify_otp(&self, id: &ApplicationId, code: &str) -> Result<(), BackendError> {
        self.inner().verify_otp(id, code).await
    }
}

struct StoredApplication {
    record: ApplicationRecord,
    decision: String,
}

/// Local stand-in for the loan backend.
///
/// Applications move to their scripted decision status once the OTP is
/// confirmed. Statements whose file name mentions `stale` are reported as outdated.
#[derive(Default, Clone)]
pub(crate) struct InMemoryIntakeBackend {
    applications: Arc<Mutex<HashMap<String, StoredApplication>>>,
}

impl InMemoryIntakeBackend {
    pub(crate) fn seeded() -> Self {
        let backend = Self::default();
        backend.insert("app-000001", "BANK_APPROVED");
        backend.insert("app-000002", "BANK_REJECTED");
        backend.insert("app-000003", "IN_REVIEW");
        backend
    }

    pub(crate) fn insert(&self, id: &str, decision: &str) {
        let now = Utc::now();
        let record = ApplicationRecord {
            id: id.to_string(),
            short_id: Some(id.trim_start_matches("app-").to_string()),
            status: "NEW".to_string(),
            amount: None,
            term: None,
            kind: None,
            loan_type: None,
            iin: None,
            first_name: None,
            last_name: None,
            middle_name: None,
            phone: None,
            preferred_payment_date: None,
            redemption_method: None,
            created_at: Some(now),
            updated_at: Some(now),
        };
        self.applications
            .lock()
            .expect("application store mutex poisoned")
            .insert(
                id.to_string(),
                StoredApplication {
                    record,
                    decision: decision.to_string(),
                },
            );
    }

    pub(crate) fn application_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .applications
            .lock()
            .expect("application store mutex poisoned")
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl IntakeBackend for InMemoryIntakeBackend {
    async fn get_application(
        &self,
        id: &ApplicationId,
    ) -> Result<ApplicationRecord, BackendError> {
        self.applications
            .lock()
            .expect("application store mutex poisoned")
            .get(&id.0)
            .map(|stored| stored.record.clone())
            .ok_or(BackendError::NotFound)
    }

    async fn update_application(
        &self,
        id: &ApplicationId,
        patch: &ApplicationPatch,
    ) -> Result<ApplicationRecord, BackendError> {
        let mut guard = self
            .applications
            .lock()
            .expect("application store mutex poisoned");
        let stored = guard.get_mut(&id.0).ok_or(BackendError::NotFound)?;
        patch.merge_into(&mut stored.record);
        stored.record.updated_at = Some(Utc::now());
        Ok(stored.record.clone())
    }

    async fn check_statement(
        &self,
        request: &StatementCheckRequest,
    ) -> Result<StatementCheckResponse, BackendError> {
        if !self
            .applications
            .lock()
            .expect("application store mutex poisoned")
            .contains_key(&request.application_id.0)
        {
            return Err(BackendError::NotFound);
        }

        let file_name = request.document.file_name().to_ascii_lowercase();
        if file_name.contains("stale") {
            return Ok(StatementCheckResponse {
                success: false,
                message: Some("Statement period is outdated".to_string()),
                ..StatementCheckResponse::default()
            });
        }

        Ok(StatementCheckResponse {
            success: true,
            data: Some(StatementCheckData {
                score: Some(serde_json::json!({ "bank": request.bank_id.0, "pages": 1 })),
                ..StatementCheckData::default()
            }),
            ..StatementCheckResponse::default()
        })
    }

    async fn send_otp(&self, id: &ApplicationId) -> Result<(), BackendError> {
        if self
            .applications
            .lock()
            .expect("application store mutex poisoned")
            .contains_key(&id.0)
        {
            tracing::info!(application_id = %id, "demo confirmation code issued");
            Ok(())
        } else {
            Err(BackendError::NotFound)
        }
    }

    async fn verify_otp(&self, id: &ApplicationId, code: &str) -> Result<(), BackendError> {
        if code != DEMO_OTP_CODE {
            return Err(BackendError::Rejected("confirmation code mismatch".to_string()));
        }
        let mut guard = self
            .applications
            .lock()
            .expect("application store mutex poisoned");
        let stored = guard.get_mut(&id.0).ok_or(BackendError::NotFound)?;
        stored.record.status = stored.decision.clone();
        stored.record.updated_at = Some(Utc::now());
        Ok(())
    }
}
