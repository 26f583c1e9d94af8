//! Integration tests for the HTTP router: probes, guards and fallback.

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use serde_json::Value;
use tower::ServiceExt;

use retrievia::config::{RawEnv, Settings, load_from};
use retrievia::http::{AppState, build_router};

// ── helpers ──────────────────────────────────────────────────────────────────

fn settings(extra: &[(&str, &str)]) -> Arc<Settings> {
    let mut pairs = vec![("JWT_SECRET_KEY", "integration-secret")];
    pairs.extend_from_slice(extra);
    Arc::new(load_from(&RawEnv::from_pairs(pairs)).expect("settings"))
}

fn ready_router(extra: &[(&str, &str)]) -> Router {
    let state = AppState::new(settings(extra));
    state.readiness.mark_ready();
    build_router(state)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(resp: axum::response::Response) -> Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ── probes ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn healthz_is_ok_and_repeatable() {
    let app = ready_router(&[]);
    for _ in 0..3 {
        let resp = app.clone().oneshot(get("/healthz")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await, serde_json::json!({"status": "ok"}));
    }
}

#[tokio::test]
async fn healthz_answers_before_ready() {
    let app = build_router(AppState::new(settings(&[])));
    let resp = app.oneshot(get("/healthz")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn readyz_reflects_startup() {
    let state = AppState::new(settings(&[]));
    let app = build_router(state.clone());

    let resp = app.clone().oneshot(get("/readyz")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(resp).await["status"], "starting");

    state.readiness.mark_ready();

    let resp = app.oneshot(get("/readyz")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await, serde_json::json!({"status": "ready"}));
}

#[tokio::test]
async fn unknown_path_is_json_404() {
    let resp = ready_router(&[]).oneshot(get("/nope")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(resp).await["detail"], "not_found");
}

// ── guards ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn oversized_content_length_is_413() {
    let app = ready_router(&[("REQUEST_MAX_BODY_BYTES", "16")]);
    let req = Request::builder()
        .method("POST")
        .uri("/anything")
        .header(header::CONTENT_LENGTH, "17")
        .body(Body::from(vec![b'x'; 17]))
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(json_body(resp).await["detail"], "request_entity_too_large");
}

#[tokio::test]
async fn body_within_limit_passes_guard() {
    let app = ready_router(&[("REQUEST_MAX_BODY_BYTES", "16")]);
    let req = Request::builder()
        .method("POST")
        .uri("/anything")
        .header(header::CONTENT_LENGTH, "4")
        .body(Body::from("data"))
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_content_length_is_ignored_by_guard() {
    let app = ready_router(&[("REQUEST_MAX_BODY_BYTES", "16")]);
    let req = Request::builder()
        .uri("/anything")
        .header(header::CONTENT_LENGTH, "lots")
        .body(Body::empty())
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_ne!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn rate_limit_returns_429_with_retry_after() {
    let app = ready_router(&[
        ("RATE_LIMIT_REQUESTS", "2"),
        ("RATE_LIMIT_WINDOW_SECONDS", "3600"),
    ]);

    for _ in 0..2 {
        let resp = app.clone().oneshot(get("/api/x")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    let resp = app.oneshot(get("/api/x")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);

    let retry_after: u64 = resp
        .headers()
        .get(header::RETRY_AFTER)
        .expect("Retry-After header")
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=3600).contains(&retry_after));
    assert_eq!(json_body(resp).await["detail"], "rate_limit_exceeded");
}

#[tokio::test]
async fn probes_are_exempt_from_rate_limit() {
    let app = ready_router(&[
        ("RATE_LIMIT_REQUESTS", "1"),
        ("RATE_LIMIT_WINDOW_SECONDS", "3600"),
    ]);

    for _ in 0..5 {
        let resp = app.clone().oneshot(get("/healthz")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = app.clone().oneshot(get("/readyz")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn disabled_rate_limit_never_limits() {
    let app = ready_router(&[
        ("RATE_LIMIT_ENABLED", "false"),
        ("RATE_LIMIT_REQUESTS", "1"),
    ]);

    for _ in 0..4 {
        let resp = app.clone().oneshot(get("/api/x")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}

#[tokio::test]
async fn rate_limit_runs_before_body_guard() {
    let app = ready_router(&[
        ("RATE_LIMIT_REQUESTS", "1"),
        ("RATE_LIMIT_WINDOW_SECONDS", "3600"),
        ("REQUEST_MAX_BODY_BYTES", "1"),
    ]);
    let big = || {
        Request::builder()
            .method("POST")
            .uri("/upload")
            .header(header::CONTENT_LENGTH, "10")
            .body(Body::from(vec![0u8; 10]))
            .unwrap()
    };

    let first = app.clone().oneshot(big()).await.unwrap();
    assert_eq!(first.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let second = app.oneshot(big()).await.unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}
