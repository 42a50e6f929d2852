use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::backend::{BackendError, IntakeBackend};
use super::domain::{
    ApplicationId, BankId, DocumentError, DraftInput, StatementDocument, UploadedFile,
};
use super::machine::{IntakeView, TransitionError};
use super::otp::OtpSession;
use super::wizard::{IntakeWizard, OtpEntry, ViewSnapshot};

/// Identifier of a hosted wizard session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

static SESSION_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_session_id() -> SessionId {
    let id = SESSION_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    SessionId(format!("intake-{id:06}"))
}

/// Hosted sessions idle for longer than this are discarded.
pub const DEFAULT_SESSION_TTL_SECS: u64 = 30 * 60;

struct HostedSession<B> {
    wizard: IntakeWizard<B>,
    last_seen: DateTime<Utc>,
}

impl<B> HostedSession<B>
where
    B: IntakeBackend + 'static,
{
    /// Apply the whole seconds elapsed since the last request to the resend cooldown.
    fn catch_up(&mut self, now: DateTime<Utc>) {
        let elapsed = (now - self.last_seen).num_seconds();
        if elapsed <= 0 {
            return;
        }
        let ticks = u32::try_from(elapsed).unwrap_or(u32::MAX);
        self.wizard.elapse(ticks);
        self.last_seen += chrono::Duration::seconds(i64::from(ticks));
    }
}

struct SessionSlot<B> {
    session: Arc<tokio::sync::Mutex<HostedSession<B>>>,
    snapshot: ViewSnapshot,
    touched_at: DateTime<Utc>,
}

/// In-process registry of open intake sessions.
///
/// Each session sits behind its own async mutex. A request that finds the session
/// locked is answered from the last published view instead of queueing behind the
/// running transition. Sessions untouched for longer than the TTL are dropped on
/// the next registry access.
pub struct IntakeSessions<B> {
    backend: Arc<B>,
    otp_cooldown: u32,
    ttl: chrono::Duration,
    sessions: Mutex<HashMap<SessionId, SessionSlot<B>>>,
}

enum SessionLookup<B> {
    Ready(OwnedMutexGuard<HostedSession<B>>),
    Busy(IntakeView),
    Missing,
}

impl<B> IntakeSessions<B>
where
    B: IntakeBackend + 'static,
{
    pub fn new(backend: Arc<B>, otp_cooldown: u32) -> Self {
        Self {
            backend,
            otp_cooldown,
            ttl: chrono::Duration::seconds(DEFAULT_SESSION_TTL_SECS as i64),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_session_ttl(mut self, ttl_secs: u64) -> Self {
        let secs = i64::try_from(ttl_secs).unwrap_or(i64::MAX).min(i64::MAX / 1000);
        self.ttl = chrono::Duration::seconds(secs);
        self
    }

    /// Open a wizard on an existing application record.
    pub async fn open(
        &self,
        application_id: ApplicationId,
    ) -> Result<(SessionId, IntakeView), BackendError> {
        let wizard = IntakeWizard::start(
            self.backend.clone(),
            application_id,
            OtpSession::with_cooldown(self.otp_cooldown),
        )
        .await?;
        let view = wizard.view();
        let snapshot = wizard.snapshot();
        let session_id = next_session_id();
        let now = Utc::now();

        let hosted = HostedSession {
            wizard,
            last_seen: now,
        };
        let mut sessions = self
            .sessions
            .lock()
            .expect("session registry mutex poisoned");
        self.sweep(&mut sessions, now);
        sessions.insert(
            session_id.clone(),
            SessionSlot {
                session: Arc::new(tokio::sync::Mutex::new(hosted)),
                snapshot,
                touched_at: now,
            },
        );
        Ok((session_id, view))
    }

    /// Drop a session. The draft is discarded; the backend record is untouched.
    pub fn close(&self, session_id: &SessionId) -> bool {
        self.sessions
            .lock()
            .expect("session registry mutex poisoned")
            .remove(session_id)
            .is_some()
    }

    /// Discard sessions idle longer than the TTL as of `now`. Sessions with a
    /// transition still running are kept. Returns how many were dropped.
    pub fn evict_idle(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self
            .sessions
            .lock()
            .expect("session registry mutex poisoned");
        self.sweep(&mut sessions, now)
    }

    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .expect("session registry mutex poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sweep(
        &self,
        sessions: &mut HashMap<SessionId, SessionSlot<B>>,
        now: DateTime<Utc>,
    ) -> usize {
        let before = sessions.len();
        sessions.retain(|session_id, slot| {
            let keep = now - slot.touched_at <= self.ttl || slot.session.try_lock().is_err();
            if !keep {
                info!(session_id = %session_id.0, "idle intake session discarded");
            }
            keep
        });
        before - sessions.len()
    }

    fn acquire(&self, session_id: &SessionId) -> SessionLookup<B> {
        let now = Utc::now();
        let (session, snapshot) = {
            let mut sessions = self
                .sessions
                .lock()
                .expect("session registry mutex poisoned");
            self.sweep(&mut sessions, now);
            match sessions.get_mut(session_id) {
                Some(slot) => {
                    slot.touched_at = now;
                    (slot.session.clone(), slot.snapshot.clone())
                }
                None => return SessionLookup::Missing,
            }
        };
        match session.try_lock_owned() {
            Ok(mut guard) => {
                guard.catch_up(now);
                SessionLookup::Ready(guard)
            }
            Err(_) => {
                let mut view = snapshot.get();
                view.busy = true;
                SessionLookup::Busy(view)
            }
        }
    }
}

/// Router exposing hosted intake sessions.
pub fn intake_router<B>(sessions: Arc<IntakeSessions<B>>) -> Router
where
    B: IntakeBackend + 'static,
{
    Router::new()
        .route("/api/v1/intake/sessions", post(open_handler::<B>))
        .route(
            "/api/v1/intake/sessions/:session_id",
            get(view_handler::<B>).delete(close_handler::<B>),
        )
        .route(
            "/api/v1/intake/sessions/:session_id/draft",
            axum::routing::patch(draft_handler::<B>),
        )
        .route(
            "/api/v1/intake/sessions/:session_id/advance",
            post(advance_handler::<B>),
        )
        .route(
            "/api/v1/intake/sessions/:session_id/back",
            post(back_handler::<B>),
        )
        .route(
            "/api/v1/intake/sessions/:session_id/skip",
            post(skip_handler::<B>),
        )
        .route(
            "/api/v1/intake/sessions/:session_id/document",
            put(attach_document_handler::<B>).delete(remove_document_handler::<B>),
        )
        .route(
            "/api/v1/intake/sessions/:session_id/otp",
            put(otp_handler::<B>),
        )
        .route(
            "/api/v1/intake/sessions/:session_id/otp/resend",
            post(resend_handler::<B>),
        )
        .with_state(sessions)
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenSessionRequest {
    pub(crate) application_id: String,
}

#[derive(Debug, Serialize)]
struct SessionEnvelope {
    session_id: SessionId,
    view: IntakeView,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SkipRequest {
    #[serde(default)]
    pub(crate) confirmed: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DocumentQuery {
    pub(crate) bank_id: String,
    pub(crate) file_name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OtpRequest {
    pub(crate) code: String,
}

pub(crate) async fn open_handler<B>(
    State(sessions): State<Arc<IntakeSessions<B>>>,
    Json(request): Json<OpenSessionRequest>,
) -> Response
where
    B: IntakeBackend + 'static,
{
    let application_id = ApplicationId(request.application_id);
    match sessions.open(application_id.clone()).await {
        Ok((session_id, view)) => {
            info!(session_id = %session_id.0, application_id = %application_id, "intake session opened");
            (StatusCode::CREATED, Json(SessionEnvelope { session_id, view })).into_response()
        }
        Err(BackendError::NotFound) => error_response(
            StatusCode::NOT_FOUND,
            format!("application {application_id} not found"),
        ),
        Err(other) => error_response(StatusCode::BAD_GATEWAY, other.to_string()),
    }
}

pub(crate) async fn view_handler<B>(
    State(sessions): State<Arc<IntakeSessions<B>>>,
    Path(session_id): Path<String>,
) -> Response
where
    B: IntakeBackend + 'static,
{
    match sessions.acquire(&SessionId(session_id)) {
        SessionLookup::Ready(hosted) => view_response(StatusCode::OK, &hosted),
        SessionLookup::Busy(view) => (StatusCode::OK, Json(view)).into_response(),
        SessionLookup::Missing => {
            error_response(StatusCode::NOT_FOUND, "session not found".to_string())
        }
    }
}

pub(crate) async fn close_handler<B>(
    State(sessions): State<Arc<IntakeSessions<B>>>,
    Path(session_id): Path<String>,
) -> Response
where
    B: IntakeBackend + 'static,
{
    if sessions.close(&SessionId(session_id)) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        error_response(StatusCode::NOT_FOUND, "session not found".to_string())
    }
}

pub(crate) async fn draft_handler<B>(
    State(sessions): State<Arc<IntakeSessions<B>>>,
    Path(session_id): Path<String>,
    Json(input): Json<DraftInput>,
) -> Response
where
    B: IntakeBackend + 'static,
{
    let mut hosted = match sessions.acquire(&SessionId(session_id)) {
        SessionLookup::Ready(hosted) => hosted,
        other => return lookup_failure(other),
    };
    let result = hosted.wizard.update_draft(input);
    transition_response(&hosted, result)
}

pub(crate) async fn advance_handler<B>(
    State(sessions): State<Arc<IntakeSessions<B>>>,
    Path(session_id): Path<String>,
) -> Response
where
    B: IntakeBackend + 'static,
{
    let mut hosted = match sessions.acquire(&SessionId(session_id)) {
        SessionLookup::Ready(hosted) => hosted,
        other => return lookup_failure(other),
    };
    settle(tokio::spawn(async move {
        let result = hosted.wizard.advance().await;
        transition_response(&hosted, result)
    }))
    .await
}

pub(crate) async fn back_handler<B>(
    State(sessions): State<Arc<IntakeSessions<B>>>,
    Path(session_id): Path<String>,
) -> Response
where
    B: IntakeBackend + 'static,
{
    let mut hosted = match sessions.acquire(&SessionId(session_id)) {
        SessionLookup::Ready(hosted) => hosted,
        other => return lookup_failure(other),
    };
    let result = hosted.wizard.back();
    transition_response(&hosted, result)
}

pub(crate) async fn skip_handler<B>(
    State(sessions): State<Arc<IntakeSessions<B>>>,
    Path(session_id): Path<String>,
    Json(request): Json<SkipRequest>,
) -> Response
where
    B: IntakeBackend + 'static,
{
    let mut hosted = match sessions.acquire(&SessionId(session_id)) {
        SessionLookup::Ready(hosted) => hosted,
        other => return lookup_failure(other),
    };
    settle(tokio::spawn(async move {
        let result = hosted.wizard.skip(request.confirmed).await;
        transition_response(&hosted, result)
    }))
    .await
}

pub(crate) async fn attach_document_handler<B>(
    State(sessions): State<Arc<IntakeSessions<B>>>,
    Path(session_id): Path<String>,
    Query(query): Query<DocumentQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    B: IntakeBackend + 'static,
{
    let upload = UploadedFile {
        file_name: query.file_name,
        content_type: headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        bytes: body.to_vec(),
    };
    let document = match StatementDocument::from_upload(upload) {
        Ok(document) => document,
        Err(error @ DocumentError::TooLarge { .. }) => {
            return error_response(StatusCode::PAYLOAD_TOO_LARGE, error.to_string())
        }
        Err(error) => return error_response(StatusCode::UNPROCESSABLE_ENTITY, error.to_string()),
    };

    let mut hosted = match sessions.acquire(&SessionId(session_id)) {
        SessionLookup::Ready(hosted) => hosted,
        other => return lookup_failure(other),
    };
    let result = hosted
        .wizard
        .attach_document(BankId(query.bank_id), document);
    transition_response(&hosted, result)
}

pub(crate) async fn remove_document_handler<B>(
    State(sessions): State<Arc<IntakeSessions<B>>>,
    Path(session_id): Path<String>,
) -> Response
where
    B: IntakeBackend + 'static,
{
    let mut hosted = match sessions.acquire(&SessionId(session_id)) {
        SessionLookup::Ready(hosted) => hosted,
        other => return lookup_failure(other),
    };
    let result = hosted.wizard.remove_document();
    transition_response(&hosted, result)
}

pub(crate) async fn otp_handler<B>(
    State(sessions): State<Arc<IntakeSessions<B>>>,
    Path(session_id): Path<String>,
    Json(request): Json<OtpRequest>,
) -> Response
where
    B: IntakeBackend + 'static,
{
    let mut hosted = match sessions.acquire(&SessionId(session_id)) {
        SessionLookup::Ready(hosted) => hosted,
        other => return lookup_failure(other),
    };
    settle(tokio::spawn(async move {
        let result: Result<OtpEntry, TransitionError> =
            hosted.wizard.input_otp(&request.code).await;
        transition_response(&hosted, result)
    }))
    .await
}

pub(crate) async fn resend_handler<B>(
    State(sessions): State<Arc<IntakeSessions<B>>>,
    Path(session_id): Path<String>,
) -> Response
where
    B: IntakeBackend + 'static,
{
    let mut hosted = match sessions.acquire(&SessionId(session_id)) {
        SessionLookup::Ready(hosted) => hosted,
        other => return lookup_failure(other),
    };
    settle(tokio::spawn(async move {
        let result = hosted.wizard.resend_otp().await;
        transition_response(&hosted, result)
    }))
    .await
}

/// Await a transition that runs on its own task. The task keeps the session
/// locked until the transition settles, even if the client goes away.
async fn settle(task: JoinHandle<Response>) -> Response {
    match task.await {
        Ok(response) => response,
        Err(error) => {
            warn!(%error, "intake transition task failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "transition failed".to_string(),
            )
        }
    }
}

fn view_response<B>(status: StatusCode, hosted: &HostedSession<B>) -> Response
where
    B: IntakeBackend + 'static,
{
    (status, Json(hosted.wizard.publish())).into_response()
}

fn transition_response<B, T>(
    hosted: &HostedSession<B>,
    result: Result<T, TransitionError>,
) -> Response
where
    B: IntakeBackend + 'static,
{
    let error = match result {
        Ok(_) => return view_response(StatusCode::OK, hosted),
        Err(error) => error,
    };

    let status = match &error {
        TransitionError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        TransitionError::Busy | TransitionError::NotAvailable { .. } => StatusCode::CONFLICT,
        TransitionError::ConfirmationRequired(_) => StatusCode::PRECONDITION_REQUIRED,
        TransitionError::CooldownActive { .. } => StatusCode::TOO_MANY_REQUESTS,
        TransitionError::Failed(_) => StatusCode::BAD_GATEWAY,
    };

    let mut payload = json!({
        "error": error.to_string(),
        "view": hosted.wizard.publish(),
    });
    match &error {
        TransitionError::Validation(errors) => payload["errors"] = json!(errors),
        TransitionError::ConfirmationRequired(prompt) => payload["confirmation"] = json!(prompt),
        TransitionError::CooldownActive { remaining } => payload["retry_after"] = json!(remaining),
        _ => {}
    }
    (status, Json(payload)).into_response()
}

fn lookup_failure<B>(lookup: SessionLookup<B>) -> Response {
    match lookup {
        SessionLookup::Busy(view) => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "session busy", "view": view })),
        )
            .into_response(),
        SessionLookup::Missing | SessionLookup::Ready(_) => {
            error_response(StatusCode::NOT_FOUND, "session not found".to_string())
        }
    }
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
