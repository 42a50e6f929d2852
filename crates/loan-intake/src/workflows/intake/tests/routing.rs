use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use super::common::*;
use crate::workflows::intake::{intake_router, IntakeSessions, DEFAULT_SESSION_TTL_SECS};

fn router() -> (Router, Arc<IntakeSessions<MemoryBackend>>) {
    router_with(MemoryBackend::shared())
}

fn router_with(backend: Arc<MemoryBackend>) -> (Router, Arc<IntakeSessions<MemoryBackend>>) {
    let sessions = Arc::new(IntakeSessions::new(backend, 60));
    (intake_router(sessions.clone()), sessions)
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty_request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn open_session(router: &Router) -> String {
    let response = router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/api/v1/intake/sessions",
            json!({ "application_id": APPLICATION }),
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = read_json_body(response).await;
    assert_eq!(payload["view"]["step"], "product_selection");
    payload["session_id"]
        .as_str()
        .expect("session id")
        .to_string()
}

#[tokio::test]
async fn open_returns_not_found_for_unknown_application() {
    let (router, sessions) = router();

    let response = router
        .oneshot(json_request(
            Method::POST,
            "/api/v1/intake/sessions",
            json!({ "application_id": "app-999999" }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(sessions.is_empty());
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let (router, _) = router();

    let response = router
        .oneshot(empty_request(Method::GET, "/api/v1/intake/sessions/intake-000000"))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_amount_returns_field_errors() {
    let (router, _) = router();
    let session = open_session(&router).await;

    let response = router
        .clone()
        .oneshot(json_request(
            Method::PATCH,
            &format!("/api/v1/intake/sessions/{session}/draft"),
            json!({ "amount": "5000" }),
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .oneshot(empty_request(
            Method::POST,
            &format!("/api/v1/intake/sessions/{session}/advance"),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let payload = read_json_body(response).await;
    assert_eq!(payload["errors"]["amount"], "Minimum amount is 10 000");
    assert_eq!(payload["view"]["step_number"], 1);
}

#[tokio::test]
async fn skip_without_confirmation_asks_for_it() {
    let (router, _) = router();
    let session = open_session(&router).await;
    let base = format!("/api/v1/intake/sessions/{session}");

    for body in [
        json!({ "amount": "250 000", "term": 12, "product_type": "loan" }),
        json!({
            "iin": "900101300123",
            "first_name": "Aigerim",
            "last_name": "Nurlanova",
            "phone": "87015551234",
            "preferred_payment_day": "5"
        }),
    ] {
        let response = router
            .clone()
            .oneshot(json_request(Method::PATCH, &format!("{base}/draft"), body))
            .await
            .expect("route executes");
        assert_eq!(response.status(), StatusCode::OK);
        let response = router
            .clone()
            .oneshot(empty_request(Method::POST, &format!("{base}/advance")))
            .await
            .expect("route executes");
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = router
        .clone()
        .oneshot(json_request(
            Method::POST,
            &format!("{base}/skip"),
            json!({}),
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::PRECONDITION_REQUIRED);
    let payload = read_json_body(response).await;
    assert!(payload["confirmation"].is_string());

    let response = router
        .clone()
        .oneshot(json_request(
            Method::POST,
            &format!("{base}/skip"),
            json!({ "confirmed": true }),
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["step"], "otp_verification");
    assert_eq!(payload["otp"]["cooldown_remaining"], 60);

    let response = router
        .oneshot(empty_request(Method::POST, &format!("{base}/otp/resend")))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let payload = read_json_body(response).await;
    assert!(payload["retry_after"].as_u64().is_some());
}

#[tokio::test]
async fn non_pdf_upload_is_rejected_before_the_session_is_touched() {
    let (router, _) = router();
    let session = open_session(&router).await;

    let response = router
        .oneshot(
            Request::builder()
                .method(Method::PUT)
                .uri(format!(
                    "/api/v1/intake/sessions/{session}/document?bank_id=kaspi&file_name=photo.png"
                ))
                .header(header::CONTENT_TYPE, "image/png")
                .body(Body::from(vec![0x89, b'P', b'N', b'G']))
                .unwrap(),
        )
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn document_on_wrong_step_conflicts() {
    let (router, _) = router();
    let session = open_session(&router).await;

    let response = router
        .oneshot(
            Request::builder()
                .method(Method::PUT)
                .uri(format!(
                    "/api/v1/intake/sessions/{session}/document?bank_id=kaspi&file_name=statement.pdf"
                ))
                .header(header::CONTENT_TYPE, "application/pdf")
                .body(Body::from(b"%PDF-1.4 statement".to_vec()))
                .unwrap(),
        )
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn close_discards_the_session() {
    let (router, sessions) = router();
    let session = open_session(&router).await;
    assert_eq!(sessions.len(), 1);

    let response = router
        .clone()
        .oneshot(empty_request(
            Method::DELETE,
            &format!("/api/v1/intake/sessions/{session}"),
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(sessions.is_empty());

    let response = router
        .oneshot(empty_request(
            Method::DELETE,
            &format!("/api/v1/intake/sessions/{session}"),
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

async fn fill_and_advance(router: &Router, base: &str, draft: Value) {
    let response = router
        .clone()
        .oneshot(json_request(Method::PATCH, &format!("{base}/draft"), draft))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK);
    let response = router
        .clone()
        .oneshot(empty_request(Method::POST, &format!("{base}/advance")))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn locked_session_is_reported_busy() {
    let backend = MemoryBackend::shared();
    let (router, _) = router_with(backend.clone());
    let session = open_session(&router).await;
    let base = format!("/api/v1/intake/sessions/{session}");
    fill_and_advance(
        &router,
        &base,
        json!({ "amount": "250 000", "term": 12, "product_type": "loan" }),
    )
    .await;
    fill_and_advance(
        &router,
        &base,
        json!({
            "iin": "900101300123",
            "first_name": "Aigerim",
            "last_name": "Nurlanova",
            "phone": "87015551234",
            "preferred_payment_day": "5"
        }),
    )
    .await;

    backend.hold_send_otp.store(true, Ordering::SeqCst);
    let held = tokio::spawn(router.clone().oneshot(json_request(
        Method::POST,
        &format!("{base}/skip"),
        json!({ "confirmed": true }),
    )));
    backend.send_otp_started.notified().await;

    let response = router
        .clone()
        .oneshot(empty_request(Method::GET, &base))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["busy"], true);
    assert_eq!(payload["step"], "document_upload");

    let response = router
        .oneshot(empty_request(Method::POST, &format!("{base}/back")))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let payload = read_json_body(response).await;
    assert_eq!(payload["error"], "session busy");
    assert_eq!(payload["view"]["busy"], true);

    held.abort();
}

#[tokio::test]
async fn idle_sessions_are_evicted_after_the_ttl() {
    let (router, sessions) = router();
    let idle = open_session(&router).await;
    assert_eq!(sessions.len(), 1);

    assert_eq!(sessions.evict_idle(chrono::Utc::now()), 0);
    let later = chrono::Utc::now()
        + chrono::Duration::seconds(DEFAULT_SESSION_TTL_SECS as i64 + 1);
    assert_eq!(sessions.evict_idle(later), 1);
    assert!(sessions.is_empty());

    let response = router
        .oneshot(empty_request(
            Method::GET,
            &format!("/api/v1/intake/sessions/{idle}"),
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn zero_ttl_drops_stale_sessions_on_next_access() {
    let sessions = Arc::new(IntakeSessions::new(MemoryBackend::shared(), 60).with_session_ttl(0));
    let router = intake_router(sessions.clone());
    open_session(&router).await;
    std::thread::sleep(std::time::Duration::from_millis(5));

    open_session(&router).await;
    assert_eq!(sessions.len(), 1);
}
