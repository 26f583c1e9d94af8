//! Request guards applied to every route: a fixed-window rate limiter and a
//! request body size cap.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use super::AppState;
use super::api::detail;

/// Probe and scrape paths never count against a client's budget.
const EXEMPT_PATHS: &[&str] = &["/healthz", "/readyz", "/metrics"];

// ── RateLimiter ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    /// Over budget; retry after this many seconds (start of the next window).
    Limited { retry_after: u64 },
}

/// Fixed-window request counter keyed by client identity.
///
/// Window index is `now_secs / window_seconds`. Counters from earlier
/// windows are dropped the first time a later window is seen.
pub struct RateLimiter {
    limit: u32,
    window_seconds: u64,
    state: Mutex<WindowState>,
}

#[derive(Default)]
struct WindowState {
    window: u64,
    counts: HashMap<String, u32>,
}

impl RateLimiter {
    pub fn new(limit: u32, window_seconds: u64) -> Self {
        Self {
            limit,
            window_seconds: window_seconds.max(1),
            state: Mutex::new(WindowState::default()),
        }
    }

    /// Count one request for `identity` at wall-clock second `now_secs`.
    pub fn check(&self, identity: &str, now_secs: u64) -> RateDecision {
        let window = now_secs / self.window_seconds;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if window != state.window {
            state.window = window;
            state.counts.clear();
        }

        let count = state.counts.entry(identity.to_string()).or_insert(0);
        *count = count.saturating_add(1);

        if *count > self.limit {
            RateDecision::Limited {
                retry_after: self.window_seconds - now_secs % self.window_seconds,
            }
        } else {
            RateDecision::Allowed
        }
    }

    /// Number of identities tracked in the current window.
    pub fn tracked(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .counts
            .len()
    }
}

// ── Middleware ────────────────────────────────────────────────────────────────

pub(super) async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if !state.settings.rate_limit.enabled || EXEMPT_PATHS.contains(&path) {
        return next.run(request).await;
    }

    let identity = client_identity(&request);
    let now = chrono::Utc::now().timestamp().max(0) as u64;

    match state.limiter.check(&identity, now) {
        RateDecision::Allowed => next.run(request).await,
        RateDecision::Limited { retry_after } => {
            warn!(%identity, path = %request.uri().path(), retry_after, "rate_limit_exceeded");
            let mut response = detail(StatusCode::TOO_MANY_REQUESTS, "rate_limit_exceeded");
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
            response
        }
    }
}

pub(super) async fn body_size(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let max = state.settings.request_max_body_bytes;

    // An unparseable Content-Length is left for the body extractor to reject.
    let declared = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    if let Some(len) = declared {
        if len > max as u64 {
            warn!(content_length = len, max, "request_entity_too_large");
            return detail(StatusCode::PAYLOAD_TOO_LARGE, "request_entity_too_large");
        }
    }

    next.run(request).await
}

fn client_identity(request: &Request) -> String {
    match request.extensions().get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(addr)) => format!("ip:{}", addr.ip()),
        None => "ip:unknown".to_string(),
    }
}
