use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::backend::{BackendError, IntakeBackend};
use super::domain::{ApplicationId, BankId, DraftInput, StatementDocument, Step};
use super::machine::{
    Effect, EffectResult, IntakeMachine, IntakeView, Notice, NoticeKind, TransitionError,
};
use super::otp::OtpSession;
use super::outcome::Outcome;
use super::statement::StatementCheckResult;

/// Result of feeding digits into the OTP step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "outcome", rename_all = "snake_case")]
pub enum OtpEntry {
    /// The buffer is incomplete, or this value was already submitted.
    Buffered,
    Verified(Outcome),
}

/// Last published view of a wizard, readable while a transition holds the wizard.
#[derive(Debug, Clone)]
pub struct ViewSnapshot(Arc<Mutex<IntakeView>>);

impl ViewSnapshot {
    fn new(view: IntakeView) -> Self {
        Self(Arc::new(Mutex::new(view)))
    }

    pub fn get(&self) -> IntakeView {
        self.0.lock().expect("view snapshot mutex poisoned").clone()
    }

    fn publish(&self, view: IntakeView) {
        *self.0.lock().expect("view snapshot mutex poisoned") = view;
    }
}

/// Intake session: owns the machine and runs its effects against the backend.
///
/// Effects run one at a time and each transition is awaited to completion before
/// the method returns, so `&mut self` is the only concurrency control a single
/// session needs. Hosts sharing a wizard across tasks must still serialize access.
/// A transition whose future is dropped before it settles is aborted and the
/// session stays retryable.
pub struct IntakeWizard<B> {
    machine: IntakeMachine,
    backend: Arc<B>,
    snapshot: ViewSnapshot,
}

impl<B> IntakeWizard<B>
where
    B: IntakeBackend + 'static,
{
    /// Fetch the backing record and open a session on it.
    pub async fn start(
        backend: Arc<B>,
        application_id: ApplicationId,
        otp: OtpSession,
    ) -> Result<Self, BackendError> {
        let record = backend.get_application(&application_id).await?;
        info!(application_id = %application_id, status = %record.status, "intake session started");
        Ok(Self::with_machine(
            backend,
            IntakeMachine::from_record(record, otp),
        ))
    }

    pub fn with_machine(backend: Arc<B>, machine: IntakeMachine) -> Self {
        let snapshot = ViewSnapshot::new(machine.view());
        Self {
            machine,
            backend,
            snapshot,
        }
    }

    /// Handle to the published view. It shows `busy` while effects are running.
    pub fn snapshot(&self) -> ViewSnapshot {
        self.snapshot.clone()
    }

    /// Publish the current view to snapshot readers and return it.
    pub fn publish(&self) -> IntakeView {
        let view = self.machine.view();
        self.snapshot.publish(view.clone());
        view
    }

    pub fn machine(&self) -> &IntakeMachine {
        &self.machine
    }

    pub fn step(&self) -> Step {
        self.machine.step()
    }

    pub fn view(&self) -> IntakeView {
        self.machine.view()
    }

    pub fn update_draft(&mut self, input: DraftInput) -> Result<(), TransitionError> {
        self.machine.update_draft(input)
    }

    pub fn attach_document(
        &mut self,
        bank_id: BankId,
        document: StatementDocument,
    ) -> Result<(), TransitionError> {
        debug!(
            application_id = %self.machine.application_id(),
            file_name = document.file_name(),
            size_bytes = document.len(),
            "statement attached"
        );
        self.machine.attach_document(bank_id, document, Utc::now())
    }

    pub fn remove_document(&mut self) -> Result<(), TransitionError> {
        self.machine.remove_document()
    }

    /// Check the attached statement unless it already has a result or an error.
    pub async fn check_statement(
        &mut self,
    ) -> Result<Option<StatementCheckResult>, TransitionError> {
        let effect = self.machine.statement_check()?;
        self.drive(effect).await;
        Ok(self.machine.statement().outcome().cloned())
    }

    pub async fn advance(&mut self) -> Result<Step, TransitionError> {
        let before = self.machine.step();
        let effect = self.machine.request_advance()?;
        self.drive(effect).await;
        self.settle_transition(before)
    }

    pub async fn skip(&mut self, confirmed: bool) -> Result<Step, TransitionError> {
        let before = self.machine.step();
        let effect = self.machine.request_skip(confirmed)?;
        self.drive(Some(effect)).await;
        self.settle_transition(before)
    }

    pub fn back(&mut self) -> Result<Step, TransitionError> {
        let step = self.machine.back()?;
        info!(application_id = %self.machine.application_id(), step = %step, "intake step reverted");
        Ok(step)
    }

    pub async fn input_otp(&mut self, raw: &str) -> Result<OtpEntry, TransitionError> {
        let Some(effect) = self.machine.input_otp(raw)? else {
            return Ok(OtpEntry::Buffered);
        };
        self.drive(Some(effect)).await;

        match self.machine.outcome() {
            Some(outcome) => Ok(OtpEntry::Verified(outcome)),
            None => Err(self.failure()),
        }
    }

    pub async fn resend_otp(&mut self) -> Result<(), TransitionError> {
        let effect = self.machine.request_resend()?;
        self.drive(Some(effect)).await;
        match self.machine.notice() {
            Some(notice) => Err(TransitionError::Failed(notice.clone())),
            None => Ok(()),
        }
    }

    pub fn tick(&mut self) {
        self.machine.tick();
    }

    pub fn elapse(&mut self, ticks: u32) {
        self.machine.elapse(ticks);
    }

    fn settle_transition(&self, before: Step) -> Result<Step, TransitionError> {
        let after = self.machine.step();
        if after == before {
            return Err(self.failure());
        }
        info!(
            application_id = %self.machine.application_id(),
            from = %before,
            to = %after,
            "intake step advanced"
        );
        Ok(after)
    }

    fn failure(&self) -> TransitionError {
        let notice = self.machine.notice().cloned().unwrap_or_else(|| Notice {
            kind: NoticeKind::TransitionFailed,
            message: "Something went wrong. Please try again.".to_string(),
        });
        TransitionError::Failed(notice)
    }

    async fn drive(&mut self, effect: Option<Effect>) {
        let Some(first) = effect else {
            return;
        };
        let id = self.machine.application_id().clone();
        let backend = Arc::clone(&self.backend);
        let mut run = RunningTransition {
            machine: &mut self.machine,
            snapshot: &self.snapshot,
        };
        run.snapshot.publish(run.machine.view());

        let mut effect = Some(first);
        while let Some(next) = effect.take() {
            let result = execute(backend.as_ref(), &id, next).await;
            effect = run.machine.resolve(result);
        }
    }
}

/// Effect loop in progress. Dropping it before the loop settles aborts the
/// pending action so the session does not stay busy.
struct RunningTransition<'a> {
    machine: &'a mut IntakeMachine,
    snapshot: &'a ViewSnapshot,
}

impl Drop for RunningTransition<'_> {
    fn drop(&mut self) {
        if let Some(action) = self.machine.abort_pending() {
            warn!(
                application_id = %self.machine.application_id(),
                action = ?action,
                "intake transition interrupted before it settled"
            );
        }
        self.snapshot.publish(self.machine.view());
    }
}

async fn execute<B>(backend: &B, id: &ApplicationId, effect: Effect) -> EffectResult
where
    B: IntakeBackend + ?Sized,
{
    match effect {
        Effect::UpdateRecord(patch) => {
            let result = backend.update_application(id, &patch).await;
            if let Err(error) = &result {
                warn!(application_id = %id, %error, "failed to persist applicant details");
            }
            EffectResult::RecordUpdated(result)
        }
        Effect::CheckStatement(request) => {
            let result = backend.check_statement(&request).await;
            match &result {
                Ok(response) if response.success => {
                    debug!(application_id = %id, "statement check settled")
                }
                Ok(response) => {
                    warn!(application_id = %id, message = ?response.message, "statement check reported failure")
                }
                Err(error) => {
                    warn!(application_id = %id, %error, "statement check unavailable")
                }
            }
            EffectResult::StatementChecked(result)
        }
        Effect::SendOtp => {
            let result = backend.send_otp(id).await;
            if let Err(error) = &result {
                warn!(application_id = %id, %error, "failed to issue confirmation code");
            }
            EffectResult::OtpSent {
                result,
                at: Utc::now(),
            }
        }
        Effect::VerifyOtp(code) => {
            let result = backend.verify_otp(id, &code).await;
            if let Err(error) = &result {
                info!(application_id = %id, %error, "confirmation code rejected");
            }
            EffectResult::OtpVerified(result)
        }
        Effect::FetchRecord => {
            let result = backend.get_application(id).await;
            if let Err(error) = &result {
                warn!(application_id = %id, %error, "failed to refresh application, using cached snapshot");
            }
            EffectResult::RecordFetched(result)
        }
    }
}
