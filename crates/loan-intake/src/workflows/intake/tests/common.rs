use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::response::Response;
use serde_json::Value;
use tokio::sync::Notify;

use crate::workflows::intake::backend::{BackendError, IntakeBackend};
use crate::workflows::intake::domain::{
    ApplicationId, ApplicationRecord, BankId, DraftInput, ProductType, StatementDocument,
    UploadedFile,
};
use crate::workflows::intake::statement::{
    StatementCheckData, StatementCheckRequest, StatementCheckResponse,
};
use crate::workflows::intake::sync::ApplicationPatch;
use crate::workflows::intake::{EffectResult, IntakeMachine, IntakeWizard, OtpSession};

pub(super) const APPLICATION: &str = "app-000042";
pub(super) const VALID_CODE: &str = "123456";

pub(super) fn application_id() -> ApplicationId {
    ApplicationId(APPLICATION.to_string())
}

pub(super) fn record(id: &str, status: &str) -> ApplicationRecord {
    ApplicationRecord {
        id: id.to_string(),
        short_id: Some("A42".to_string()),
        status: status.to_string(),
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
        created_at: None,
        updated_at: None,
    }
}

pub(super) fn product_input(amount: &str) -> DraftInput {
    DraftInput {
        product_type: Some(ProductType::Installment),
        term: Some(24),
        amount: Some(amount.to_string()),
        ..DraftInput::default()
    }
}

pub(super) fn client_input() -> DraftInput {
    DraftInput {
        iin: Some("900101300123".to_string()),
        first_name: Some("Aigerim".to_string()),
        last_name: Some("Nurlanova".to_string()),
        middle_name: Some(String::new()),
        phone: Some("+7 (701) 555-12-34".to_string()),
        preferred_payment_day: Some("15".to_string()),
        ..DraftInput::default()
    }
}

pub(super) fn pdf(file_name: &str) -> StatementDocument {
    StatementDocument::from_upload(UploadedFile {
        file_name: file_name.to_string(),
        content_type: Some("application/pdf".to_string()),
        bytes: b"%PDF-1.7\n1 0 obj\n<<>>\nendobj\n%%EOF".to_vec(),
    })
    .expect("valid statement")
}

pub(super) fn kaspi() -> BankId {
    BankId("kaspi".to_string())
}

pub(super) fn verified_response() -> StatementCheckResponse {
    StatementCheckResponse {
        success: true,
        data: Some(StatementCheckData {
            score: Some(serde_json::json!(712)),
            ..StatementCheckData::default()
        }),
        message: None,
        error: None,
    }
}

pub(super) fn rejected_response(message: &str) -> StatementCheckResponse {
    StatementCheckResponse {
        success: false,
        data: None,
        message: Some(message.to_string()),
        error: None,
    }
}

/// Machine parked on the document step with a valid draft.
pub(super) fn machine_at_documents() -> IntakeMachine {
    let mut machine = IntakeMachine::new(application_id(), OtpSession::default());
    machine
        .update_draft(product_input("250 000"))
        .expect("editable");
    machine.request_advance().expect("step 1 valid");
    machine.update_draft(client_input()).expect("editable");
    machine.request_advance().expect("step 2 valid");
    let updated = record(APPLICATION, "NEW");
    machine.resolve(EffectResult::RecordUpdated(Ok(updated)));
    machine
}

/// Wizard over a fresh memory backend, already on the document step.
pub(super) async fn wizard_at_documents(
    backend: Arc<MemoryBackend>,
) -> IntakeWizard<MemoryBackend> {
    let mut wizard = IntakeWizard::start(backend, application_id(), OtpSession::default())
        .await
        .expect("record exists");
    wizard
        .update_draft(product_input("250 000"))
        .expect("editable");
    wizard.advance().await.expect("step 1 advances");
    wizard.update_draft(client_input()).expect("editable");
    wizard.advance().await.expect("step 2 advances");
    wizard
}

#[derive(Default)]
pub(super) struct CallCounts {
    pub(super) get: AtomicUsize,
    pub(super) update: AtomicUsize,
    pub(super) statement: AtomicUsize,
    pub(super) send_otp: AtomicUsize,
    pub(super) verify_otp: AtomicUsize,
}

/// Loan backend double. Records merge patches, approves a fixed code, and
/// moves the record to `decision` once the code is verified.
pub(super) struct MemoryBackend {
    records: Mutex<HashMap<String, ApplicationRecord>>,
    patches: Mutex<Vec<ApplicationPatch>>,
    statement_response: Mutex<Result<StatementCheckResponse, String>>,
    decision: Mutex<Option<String>>,
    pub(super) fail_update: AtomicBool,
    pub(super) fail_send_otp: AtomicBool,
    pub(super) fail_fetch_after_verify: AtomicBool,
    /// While set, `send_otp` signals `send_otp_started` and never completes.
    pub(super) hold_send_otp: AtomicBool,
    pub(super) send_otp_started: Notify,
    verified: AtomicBool,
    pub(super) calls: CallCounts,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        let mut records = HashMap::new();
        records.insert(APPLICATION.to_string(), record(APPLICATION, "NEW"));
        Self {
            records: Mutex::new(records),
            patches: Mutex::new(Vec::new()),
            statement_response: Mutex::new(Ok(verified_response())),
            decision: Mutex::new(None),
            fail_update: AtomicBool::new(false),
            fail_send_otp: AtomicBool::new(false),
            fail_fetch_after_verify: AtomicBool::new(false),
            hold_send_otp: AtomicBool::new(false),
            send_otp_started: Notify::new(),
            verified: AtomicBool::new(false),
            calls: CallCounts::default(),
        }
    }
}

impl MemoryBackend {
    pub(super) fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(super) fn with_statement(self, response: Result<StatementCheckResponse, String>) -> Self {
        *self.statement_response.lock().expect("statement mutex poisoned") = response;
        self
    }

    pub(super) fn with_decision(self, status: &str) -> Self {
        *self.decision.lock().expect("decision mutex poisoned") = Some(status.to_string());
        self
    }

    pub(super) fn stored(&self, id: &str) -> Option<ApplicationRecord> {
        self.records
            .lock()
            .expect("records mutex poisoned")
            .get(id)
            .cloned()
    }

    pub(super) fn patches(&self) -> Vec<ApplicationPatch> {
        self.patches.lock().expect("patch mutex poisoned").clone()
    }

    pub(super) fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IntakeBackend for MemoryBackend {
    async fn get_application(
        &self,
        id: &ApplicationId,
    ) -> Result<ApplicationRecord, BackendError> {
        self.calls.get.fetch_add(1, Ordering::SeqCst);
        if self.verified.load(Ordering::SeqCst)
            && self.fail_fetch_after_verify.load(Ordering::SeqCst)
        {
            return Err(BackendError::Unavailable("refresh failed".to_string()));
        }
        self.stored(&id.0).ok_or(BackendError::NotFound)
    }

    async fn update_application(
        &self,
        id: &ApplicationId,
        patch: &ApplicationPatch,
    ) -> Result<ApplicationRecord, BackendError> {
        self.calls.update.fetch_add(1, Ordering::SeqCst);
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(BackendError::Api {
                endpoint: "update_application".to_string(),
                status: 500,
                body: "internal error".to_string(),
            });
        }
        self.patches
            .lock()
            .expect("patch mutex poisoned")
            .push(patch.clone());
        let mut records = self.records.lock().expect("records mutex poisoned");
        let record = records.get_mut(&id.0).ok_or(BackendError::NotFound)?;
        patch.merge_into(record);
        Ok(record.clone())
    }

    async fn check_statement(
        &self,
        _request: &StatementCheckRequest,
    ) -> Result<StatementCheckResponse, BackendError> {
        self.calls.statement.fetch_add(1, Ordering::SeqCst);
        self.statement_response
            .lock()
            .expect("statement mutex poisoned")
            .clone()
            .map_err(BackendError::Unavailable)
    }

    async fn send_otp(&self, _id: &ApplicationId) -> Result<(), BackendError> {
        self.calls.send_otp.fetch_add(1, Ordering::SeqCst);
        if self.hold_send_otp.load(Ordering::SeqCst) {
            self.send_otp_started.notify_one();
            return std::future::pending().await;
        }
        if self.fail_send_otp.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("sms gateway down".to_string()));
        }
        Ok(())
    }

    async fn verify_otp(&self, id: &ApplicationId, code: &str) -> Result<(), BackendError> {
        self.calls.verify_otp.fetch_add(1, Ordering::SeqCst);
        if code != VALID_CODE {
            return Err(BackendError::Rejected("invalid code".to_string()));
        }
        self.verified.store(true, Ordering::SeqCst);
        let decision = self.decision.lock().expect("decision mutex poisoned").clone();
        if let Some(status) = decision {
            if let Some(record) = self
                .records
                .lock()
                .expect("records mutex poisoned")
                .get_mut(&id.0)
            {
                record.status = status;
            }
        }
        Ok(())
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
