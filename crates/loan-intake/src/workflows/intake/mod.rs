//! Loan and installment application intake wizard.
//!
//! The wizard walks an applicant through product selection, personal data, an
//! optional bank statement and an OTP confirmation, then reports the decision
//! the backend has reached. [`machine`] holds the pure transition logic;
//! [`wizard`] runs its effects against an [`IntakeBackend`].

pub mod backend;
pub mod domain;
pub mod http;
pub mod machine;
pub mod otp;
pub mod outcome;
pub mod router;
pub mod statement;
pub mod sync;
pub mod validation;
pub mod wizard;

#[cfg(test)]
mod tests;

pub use backend::{BackendError, IntakeBackend};
pub use domain::{
    ApplicationDraft, ApplicationId, ApplicationRecord, BankId, DocumentError, DocumentReference,
    DraftInput, ProductType, StatementDocument, Step, UploadedFile,
};
pub use http::{CredentialSource, HttpBackendConfig, HttpIntakeBackend, StaticToken};
pub use machine::{
    Effect, EffectResult, IntakeMachine, IntakeView, Notice, NoticeKind, PendingAction,
    TransitionError,
};
pub use otp::{OtpSession, DEFAULT_RESEND_COOLDOWN};
pub use outcome::{resolve_outcome, Outcome};
pub use router::{intake_router, IntakeSessions, SessionId, DEFAULT_SESSION_TTL_SECS};
pub use statement::{
    StatementCheckData, StatementCheckRequest, StatementCheckResponse, StatementCheckResult,
    StatementFailureKind,
};
pub use sync::{ApplicationPatch, REDEMPTION_METHOD};
pub use validation::{validate_step, DraftField, FieldErrors};
pub use wizard::{IntakeWizard, OtpEntry, ViewSnapshot};
