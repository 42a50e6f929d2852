//! Advisory bank-statement verification.
//!
//! A check never blocks the wizard. Its outcome only changes the notice shown on
//! the document step, and a successful outcome is kept for as long as the same
//! document stays attached.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::backend::BackendError;
use super::domain::{ApplicationId, BankId, StatementDocument};

const STALENESS_VOCABULARY: &[&str] = &[
    "date", "period", "outdated", "stale", "expired", "дат", "период", "устар",
];

pub const OUTDATED_STATEMENT_NOTICE: &str =
    "The statement appears to be outdated. Please upload a current one.";
pub const GENERIC_STATEMENT_NOTICE: &str =
    "We could not process the statement. You may continue without it.";

/// Everything the verification service needs for a single check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementCheckRequest {
    pub application_id: ApplicationId,
    pub bank_id: BankId,
    pub iin: String,
    pub document: StatementDocument,
}

/// Response envelope returned by the verification service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatementCheckResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<StatementCheckData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementCheckData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementFailureKind {
    Outdated,
    Generic,
}

impl StatementFailureKind {
    pub const fn notice(self) -> &'static str {
        match self {
            StatementFailureKind::Outdated => OUTDATED_STATEMENT_NOTICE,
            StatementFailureKind::Generic => GENERIC_STATEMENT_NOTICE,
        }
    }

    fn from_message(message: Option<&str>) -> Self {
        let Some(message) = message else {
            return StatementFailureKind::Generic;
        };
        let lowered = message.to_lowercase();
        if STALENESS_VOCABULARY
            .iter()
            .any(|keyword| lowered.contains(keyword))
        {
            StatementFailureKind::Outdated
        } else {
            StatementFailureKind::Generic
        }
    }
}

/// Classified outcome of one statement check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StatementCheckResult {
    Verified {
        #[serde(skip_serializing_if = "Option::is_none")]
        score: Option<Value>,
    },
    Failed {
        kind: StatementFailureKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl StatementCheckResult {
    /// Classify a response envelope.
    ///
    /// A successful envelope that carries a business error is treated exactly like
    /// an envelope whose `success` flag is false.
    pub fn classify(response: StatementCheckResponse) -> Self {
        let StatementCheckResponse {
            success,
            data,
            message,
            error,
        } = response;
        let data = data.unwrap_or_default();

        if success && data.error_code.is_none() && data.error_message.is_none() {
            return StatementCheckResult::Verified { score: data.score };
        }

        let message = if success {
            data.error_message.or(message)
        } else {
            message.or(error).or(data.error_message)
        };
        Self::failed(data.error_code, message)
    }

    pub fn from_backend_error(error: &BackendError) -> Self {
        Self::failed(None, Some(error.to_string()))
    }

    fn failed(code: Option<String>, message: Option<String>) -> Self {
        let kind = StatementFailureKind::from_message(message.as_deref());
        StatementCheckResult::Failed {
            kind,
            code,
            message,
        }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, StatementCheckResult::Verified { .. })
    }

    /// Message shown to the applicant, if any.
    pub fn notice(&self) -> Option<&'static str> {
        match self {
            StatementCheckResult::Verified { .. } => None,
            StatementCheckResult::Failed { kind, .. } => Some(kind.notice()),
        }
    }
}

/// Attached statement plus the cached outcome of its check.
#[derive(Debug, Clone, Default)]
pub struct StatementCheckState {
    attachment: Option<(BankId, StatementDocument)>,
    outcome: Option<StatementCheckResult>,
}

impl StatementCheckState {
    /// Attach a new document. Any previous outcome belongs to the old document and is dropped.
    pub fn attach(&mut self, bank_id: BankId, document: StatementDocument) {
        self.attachment = Some((bank_id, document));
        self.outcome = None;
    }

    pub fn remove(&mut self) {
        self.attachment = None;
        self.outcome = None;
    }

    /// Free the uploaded bytes while keeping the settled outcome.
    pub fn release_document(&mut self) {
        self.attachment = None;
    }

    pub fn has_document(&self) -> bool {
        self.attachment.is_some()
    }

    pub fn outcome(&self) -> Option<&StatementCheckResult> {
        self.outcome.as_ref()
    }

    /// True when a document is attached and has neither a result nor an error yet.
    pub fn needs_check(&self) -> bool {
        self.attachment.is_some() && self.outcome.is_none()
    }

    pub fn request(&self, application_id: &ApplicationId, iin: &str) -> Option<StatementCheckRequest> {
        if !self.needs_check() {
            return None;
        }
        let (bank_id, document) = self.attachment.as_ref()?;
        Some(StatementCheckRequest {
            application_id: application_id.clone(),
            bank_id: bank_id.clone(),
            iin: iin.to_string(),
            document: document.clone(),
        })
    }

    /// Record the settled outcome. A verified result is never overwritten.
    pub fn record(&mut self, result: StatementCheckResult) {
        if !self.has_document() {
            return;
        }
        if matches!(self.outcome, Some(StatementCheckResult::Verified { .. })) {
            return;
        }
        self.outcome = Some(result);
    }
}
