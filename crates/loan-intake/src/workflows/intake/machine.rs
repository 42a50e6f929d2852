//! Pure state machine behind the intake wizard.
//!
//! Every operation mutates the machine and hands back at most one [`Effect`] for
//! the caller to run. The caller feeds the effect's result into
//! [`IntakeMachine::resolve`], which may return a follow-up effect. The machine
//! never performs I/O itself.
//!
//! ```text
//! ProductSelection ──▶ ClientData ──▶ DocumentUpload ──▶ OtpVerification ──▶ Outcome
//!                  ◀──            ◀──        │
//!                  back()         back()     └── skip() without a document
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::backend::BackendError;
use super::domain::{
    sanitize_otp, ApplicationDraft, ApplicationId, ApplicationRecord, BankId, DocumentReference,
    DraftInput, StatementDocument, Step,
};
use super::otp::{OtpSession, OtpStatusView, OTP_REJECTED_NOTICE, OTP_RESEND_FAILED_NOTICE};
use super::outcome::{resolve_outcome, Outcome};
use super::statement::{
    StatementCheckRequest, StatementCheckResponse, StatementCheckResult, StatementCheckState,
};
use super::sync::{hydrate_draft, patch_for_step, ApplicationPatch};
use super::validation::{validate_step, FieldErrors};

pub const SKIP_CONFIRMATION_PROMPT: &str =
    "Attaching a bank statement improves your chances of approval. Continue without it?";
pub const SAVE_FAILED_NOTICE: &str = "We could not save your details. Please try again.";
pub const OTP_ISSUE_FAILED_NOTICE: &str =
    "We could not send the confirmation code. Please try again.";
pub const INTERRUPTED_NOTICE: &str = "The request was interrupted. Please try again.";

/// Backend call requested by the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    UpdateRecord(ApplicationPatch),
    CheckStatement(StatementCheckRequest),
    SendOtp,
    VerifyOtp(String),
    FetchRecord,
}

/// Settled result of an [`Effect`].
#[derive(Debug)]
pub enum EffectResult {
    RecordUpdated(Result<ApplicationRecord, BackendError>),
    StatementChecked(Result<StatementCheckResponse, BackendError>),
    OtpSent {
        result: Result<(), BackendError>,
        at: DateTime<Utc>,
    },
    OtpVerified(Result<(), BackendError>),
    RecordFetched(Result<ApplicationRecord, BackendError>),
}

/// User action whose effects are currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingAction {
    Advance,
    Skip,
    StatementCheck,
    Resend,
    Verify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// A transition failed; the applicant stays on the step and may retry.
    TransitionFailed,
    OtpRejected,
    ResendFailed,
}

/// Step-local message produced by a failed side effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    fn new(kind: NoticeKind, message: &str) -> Self {
        Self {
            kind,
            message: message.to_string(),
        }
    }
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Why an operation was refused. The session is always left retryable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("validation failed: {0}")]
    Validation(FieldErrors),
    #[error("another action is still in progress")]
    Busy,
    #[error("{action} is not available on step {step}")]
    NotAvailable { step: Step, action: &'static str },
    #[error("{0}")]
    ConfirmationRequired(String),
    #[error("a new code can be requested in {remaining} seconds")]
    CooldownActive { remaining: u32 },
    #[error("{0}")]
    Failed(Notice),
}

/// Serializable snapshot of the wizard for presentation layers.
#[derive(Debug, Clone, Serialize)]
pub struct IntakeView {
    pub application_id: ApplicationId,
    pub step: Step,
    pub step_number: u8,
    pub draft: ApplicationDraft,
    pub errors: FieldErrors,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<Notice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statement: Option<StatementCheckResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statement_notice: Option<&'static str>,
    pub otp: OtpStatusView,
    pub busy: bool,
    pub can_go_back: bool,
    pub can_skip: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<ApplicationRecord>,
}

#[derive(Debug, Clone)]
pub struct IntakeMachine {
    application_id: ApplicationId,
    step: Step,
    draft: ApplicationDraft,
    show_errors: bool,
    pending: Option<PendingAction>,
    statement: StatementCheckState,
    otp: OtpSession,
    record: Option<ApplicationRecord>,
    notice: Option<Notice>,
    outcome: Option<Outcome>,
}

impl IntakeMachine {
    pub fn new(application_id: ApplicationId, otp: OtpSession) -> Self {
        Self {
            application_id,
            step: Step::ProductSelection,
            draft: ApplicationDraft::default(),
            show_errors: false,
            pending: None,
            statement: StatementCheckState::default(),
            otp,
            record: None,
            notice: None,
            outcome: None,
        }
    }

    /// Start from a fetched record, copying its persisted fields into the draft.
    pub fn from_record(record: ApplicationRecord, otp: OtpSession) -> Self {
        let mut machine = Self::new(record.application_id(), otp);
        hydrate_draft(&mut machine.draft, &record);
        machine.record = Some(record);
        machine
    }

    pub fn application_id(&self) -> &ApplicationId {
        &self.application_id
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn draft(&self) -> &ApplicationDraft {
        &self.draft
    }

    pub fn record(&self) -> Option<&ApplicationRecord> {
        self.record.as_ref()
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    pub fn otp(&self) -> &OtpSession {
        &self.otp
    }

    pub fn statement(&self) -> &StatementCheckState {
        &self.statement
    }

    pub fn pending(&self) -> Option<PendingAction> {
        self.pending
    }

    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    /// Validation of the current step, recomputed from the draft on every call.
    pub fn live_errors(&self) -> FieldErrors {
        validate_step(self.step, &self.draft)
    }

    /// Errors the applicant should see: only after a refused `advance()` on this step.
    pub fn visible_errors(&self) -> FieldErrors {
        if self.show_errors {
            self.live_errors()
        } else {
            FieldErrors::default()
        }
    }

    pub fn can_go_back(&self) -> bool {
        !self.is_busy() && self.step.previous().is_some()
    }

    pub fn can_skip(&self) -> bool {
        !self.is_busy() && self.step == Step::DocumentUpload && !self.statement.has_document()
    }

    pub fn update_draft(&mut self, input: DraftInput) -> Result<(), TransitionError> {
        self.ensure_idle()?;
        if !matches!(self.step, Step::ProductSelection | Step::ClientData) {
            return Err(self.not_available("editing applicant details"));
        }
        input.apply_to(&mut self.draft);
        Ok(())
    }

    pub fn attach_document(
        &mut self,
        bank_id: BankId,
        document: StatementDocument,
        uploaded_at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.ensure_idle()?;
        self.ensure_step(Step::DocumentUpload, "attaching a statement")?;
        self.draft.document = Some(DocumentReference {
            file_name: document.file_name().to_string(),
            size_bytes: document.len(),
            bank_id: bank_id.clone(),
            uploaded_at,
        });
        self.statement.attach(bank_id, document);
        Ok(())
    }

    pub fn remove_document(&mut self) -> Result<(), TransitionError> {
        self.ensure_idle()?;
        self.ensure_step(Step::DocumentUpload, "removing the statement")?;
        self.draft.document = None;
        self.statement.remove();
        Ok(())
    }

    /// Statement check to run for the attached document, if one is still needed.
    pub fn statement_check(&mut self) -> Result<Option<Effect>, TransitionError> {
        self.ensure_idle()?;
        self.ensure_step(Step::DocumentUpload, "checking the statement")?;
        let effect = self
            .statement
            .request(&self.application_id, self.draft.iin.trim())
            .map(Effect::CheckStatement);
        if effect.is_some() {
            self.pending = Some(PendingAction::StatementCheck);
        }
        Ok(effect)
    }

    pub fn request_advance(&mut self) -> Result<Option<Effect>, TransitionError> {
        self.ensure_idle()?;
        if matches!(self.step, Step::OtpVerification | Step::Outcome) {
            return Err(self.not_available("advance"));
        }

        let errors = self.live_errors();
        if !errors.is_empty() {
            self.show_errors = true;
            return Err(TransitionError::Validation(errors));
        }
        self.notice = None;

        match self.step {
            Step::ProductSelection => {
                self.move_to(Step::ClientData);
                Ok(None)
            }
            Step::ClientData => {
                let patch = patch_for_step(self.step, &self.draft).unwrap_or_default();
                self.pending = Some(PendingAction::Advance);
                Ok(Some(Effect::UpdateRecord(patch)))
            }
            Step::DocumentUpload => {
                self.pending = Some(PendingAction::Advance);
                let effect = self
                    .statement
                    .request(&self.application_id, self.draft.iin.trim())
                    .map(Effect::CheckStatement)
                    .unwrap_or(Effect::SendOtp);
                Ok(Some(effect))
            }
            Step::OtpVerification | Step::Outcome => Err(self.not_available("advance")),
        }
    }

    /// Leave the document step without a statement. Requires explicit confirmation.
    pub fn request_skip(&mut self, confirmed: bool) -> Result<Effect, TransitionError> {
        self.ensure_idle()?;
        self.ensure_step(Step::DocumentUpload, "skip")?;
        if self.statement.has_document() {
            return Err(self.not_available("skip with an attached statement"));
        }
        if !confirmed {
            return Err(TransitionError::ConfirmationRequired(
                SKIP_CONFIRMATION_PROMPT.to_string(),
            ));
        }
        self.notice = None;
        self.pending = Some(PendingAction::Skip);
        Ok(Effect::SendOtp)
    }

    pub fn back(&mut self) -> Result<Step, TransitionError> {
        self.ensure_idle()?;
        let previous = self
            .step
            .previous()
            .ok_or_else(|| self.not_available("back"))?;
        self.notice = None;
        self.move_to(previous);
        Ok(previous)
    }

    /// Update the OTP buffer. Returns the verify call to run when the buffer just became complete.
    pub fn input_otp(&mut self, raw: &str) -> Result<Option<Effect>, TransitionError> {
        self.ensure_step(Step::OtpVerification, "entering a code")?;
        if matches!(
            self.pending,
            Some(
                PendingAction::Advance
                    | PendingAction::Skip
                    | PendingAction::StatementCheck
                    | PendingAction::Resend
            )
        ) {
            return Err(TransitionError::Busy);
        }

        self.draft.otp = sanitize_otp(raw);
        match self.otp.observe_buffer(&self.draft.otp) {
            Some(code) => {
                self.notice = None;
                self.pending = Some(PendingAction::Verify);
                Ok(Some(Effect::VerifyOtp(code)))
            }
            None => Ok(None),
        }
    }

    pub fn request_resend(&mut self) -> Result<Effect, TransitionError> {
        self.ensure_step(Step::OtpVerification, "resending the code")?;
        self.ensure_idle()?;
        if !self.otp.resend_available() {
            return Err(TransitionError::CooldownActive {
                remaining: self.otp.cooldown_remaining(),
            });
        }
        self.pending = Some(PendingAction::Resend);
        Ok(Effect::SendOtp)
    }

    /// Drop the running action without a result. The step is unchanged and the
    /// applicant may retry. Returns the abandoned action.
    pub fn abort_pending(&mut self) -> Option<PendingAction> {
        let action = self.pending.take()?;
        if action == PendingAction::Verify {
            self.otp.verify_abandoned();
        }
        self.notice = Some(Notice::new(NoticeKind::TransitionFailed, INTERRUPTED_NOTICE));
        Some(action)
    }

    pub fn tick(&mut self) {
        self.otp.tick();
    }

    pub fn elapse(&mut self, ticks: u32) {
        self.otp.elapse(ticks);
    }

    /// Feed the result of the last effect back in. Returns the follow-up effect, if any.
    pub fn resolve(&mut self, result: EffectResult) -> Option<Effect> {
        let pending = self.pending?;

        match result {
            EffectResult::RecordUpdated(Ok(record)) => {
                self.record = Some(record);
                self.move_to(Step::DocumentUpload);
                self.finish()
            }
            EffectResult::RecordUpdated(Err(_)) => {
                self.notice = Some(Notice::new(NoticeKind::TransitionFailed, SAVE_FAILED_NOTICE));
                self.finish()
            }
            EffectResult::StatementChecked(response) => {
                let result = match response {
                    Ok(response) => StatementCheckResult::classify(response),
                    Err(error) => StatementCheckResult::from_backend_error(&error),
                };
                self.statement.record(result);
                if pending == PendingAction::StatementCheck {
                    self.finish()
                } else {
                    Some(Effect::SendOtp)
                }
            }
            EffectResult::OtpSent { result, at } => {
                match (pending, result) {
                    (PendingAction::Resend, Ok(())) => {
                        self.notice = None;
                        self.otp.code_issued(at);
                    }
                    (PendingAction::Resend, Err(_)) => {
                        self.notice =
                            Some(Notice::new(NoticeKind::ResendFailed, OTP_RESEND_FAILED_NOTICE));
                    }
                    (_, Ok(())) => {
                        self.move_to(Step::OtpVerification);
                        self.draft.otp.clear();
                        self.otp.code_issued(at);
                    }
                    (_, Err(_)) => {
                        self.notice = Some(Notice::new(
                            NoticeKind::TransitionFailed,
                            OTP_ISSUE_FAILED_NOTICE,
                        ));
                    }
                }
                self.finish()
            }
            EffectResult::OtpVerified(result) => {
                self.otp.verify_settled();
                match result {
                    Ok(()) => Some(Effect::FetchRecord),
                    Err(_) => {
                        self.notice =
                            Some(Notice::new(NoticeKind::OtpRejected, OTP_REJECTED_NOTICE));
                        self.finish()
                    }
                }
            }
            EffectResult::RecordFetched(fetched) => {
                if let Ok(record) = fetched {
                    self.record = Some(record);
                }
                let status = self
                    .record
                    .as_ref()
                    .map(|record| record.status.as_str())
                    .unwrap_or_default();
                self.outcome = Some(resolve_outcome(status));
                self.statement.release_document();
                self.move_to(Step::Outcome);
                self.finish()
            }
        }
    }

    pub fn view(&self) -> IntakeView {
        let statement = self.statement.outcome().cloned();
        let statement_notice = statement.as_ref().and_then(StatementCheckResult::notice);
        IntakeView {
            application_id: self.application_id.clone(),
            step: self.step,
            step_number: self.step.number(),
            draft: self.draft.clone(),
            errors: self.visible_errors(),
            notice: self.notice.clone(),
            statement,
            statement_notice,
            otp: self.otp.status(),
            busy: self.is_busy(),
            can_go_back: self.can_go_back(),
            can_skip: self.can_skip(),
            outcome: self.outcome,
            record: self.record.clone(),
        }
    }

    fn finish(&mut self) -> Option<Effect> {
        self.pending = None;
        None
    }

    fn move_to(&mut self, step: Step) {
        self.step = step;
        self.show_errors = false;
    }

    fn ensure_idle(&self) -> Result<(), TransitionError> {
        if self.is_busy() {
            Err(TransitionError::Busy)
        } else {
            Ok(())
        }
    }

    fn ensure_step(&self, step: Step, action: &'static str) -> Result<(), TransitionError> {
        if self.step == step {
            Ok(())
        } else {
            Err(self.not_available(action))
        }
    }

    fn not_available(&self, action: &'static str) -> TransitionError {
        TransitionError::NotAvailable {
            step: self.step,
            action,
        }
    }
}
