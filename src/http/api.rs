//! Axum handlers for the system routes.

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;

use super::AppState;

#[derive(Serialize)]
pub(super) struct StatusBody {
    status: &'static str,
}

/// GET /healthz — the process is up. No dependency checks, no side effects.
pub(super) async fn healthz() -> Json<StatusBody> {
    Json(StatusBody { status: "ok" })
}

/// GET /readyz — startup has completed and the listener is accepting.
pub(super) async fn readyz(State(state): State<AppState>) -> Response {
    if state.readiness.is_ready() {
        (StatusCode::OK, Json(StatusBody { status: "ready" })).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(StatusBody { status: "starting" }),
        )
            .into_response()
    }
}

pub(super) async fn not_found() -> Response {
    detail(StatusCode::NOT_FOUND, "not_found")
}

/// JSON `{"detail": code}` error body shared by handlers and guards.
pub(super) fn detail(status: StatusCode, code: &str) -> Response {
    (status, Json(json!({ "detail": code }))).into_response()
}
