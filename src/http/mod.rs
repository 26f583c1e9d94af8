//! HTTP service — axum router with liveness/readiness endpoints and request
//! guards.
//!
//! [`ApiServer`] implements [`Component`] so it runs under the shared
//! runtime: `run()` binds the listener, marks the process ready and drives
//! the axum event loop; the [`CancellationToken`] is wired to axum's
//! graceful shutdown.
//!
//! ## URL layout
//!
//! ```text
//! GET  /healthz   → 200 {"status":"ok"}
//! GET  /readyz    → 200 {"status":"ready"} | 503 {"status":"starting"}
//! *    anything   → 404 {"detail":"not_found"}
//! ```

mod api;
mod guard;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::DefaultBodyLimit;
use axum::{Router, middleware, routing::get};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Settings;
use crate::error::AppError;
use crate::runtime::{Component, ComponentFuture};

pub use guard::{RateDecision, RateLimiter};

// ── Readiness ─────────────────────────────────────────────────────────────────

/// Set once startup has finished. Cheap to clone; all clones share the flag.
#[derive(Clone, Default)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_ready(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// ── Shared request state ──────────────────────────────────────────────────────

/// Axum router state injected into handlers and guards.
///
/// Cheap to clone — all fields are reference-counted.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub readiness: Readiness,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(settings: Arc<Settings>) -> Self {
        let limiter = RateLimiter::new(
            settings.rate_limit.requests,
            settings.rate_limit.window_seconds,
        );
        Self {
            settings,
            readiness: Readiness::new(),
            limiter: Arc::new(limiter),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────────────

/// Build the application router. Layers added last run first, so the rate
/// limiter sees every request before the body-size guard.
pub fn build_router(state: AppState) -> Router {
    let max_body = state.settings.request_max_body_bytes;

    Router::new()
        .route("/healthz", get(api::healthz))
        .route("/readyz", get(api::readyz))
        .fallback(api::not_found)
        .layer(DefaultBodyLimit::max(max_body))
        .layer(middleware::from_fn_with_state(state.clone(), guard::body_size))
        .layer(middleware::from_fn_with_state(state.clone(), guard::rate_limit))
        .with_state(state)
}

// ── ApiServer ─────────────────────────────────────────────────────────────────

pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { state: AppState::new(settings) }
    }

    /// Shared state handle; the readiness flag flips once `run` has bound.
    pub fn state(&self) -> &AppState {
        &self.state
    }
}

impl Component for ApiServer {
    fn id(&self) -> &str {
        "http"
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(run_server(self.state, shutdown))
    }
}

async fn run_server(state: AppState, shutdown: CancellationToken) -> Result<(), AppError> {
    let settings = state.settings.clone();
    let bind_addr = settings.bind_addr();

    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| AppError::Http(format!("bind failed on {bind_addr}: {e}")))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| AppError::Http(format!("listener address unavailable: {e}")))?;

    let readiness = state.readiness.clone();
    let router = build_router(state);

    info!(
        app_name = %settings.app_name,
        app_env = %settings.app_env,
        log_level = %settings.log.level,
        %local_addr,
        "startup_complete"
    );
    readiness.mark_ready();

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await
    .map_err(|e| AppError::Http(format!("server error: {e}")))?;

    info!("shutdown_complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RawEnv, load_from};
    use std::time::Duration;

    fn settings_on_ephemeral_port() -> Arc<Settings> {
        let env = RawEnv::from_pairs([
            ("JWT_SECRET_KEY", "k"),
            ("API_HOST", "127.0.0.1"),
            ("API_PORT", "0"),
        ]);
        Arc::new(load_from(&env).unwrap())
    }

    #[test]
    fn readiness_clones_share_state() {
        let a = Readiness::new();
        let b = a.clone();
        assert!(!b.is_ready());
        a.mark_ready();
        assert!(b.is_ready());
    }

    #[tokio::test]
    async fn server_becomes_ready_then_shuts_down() {
        let server = ApiServer::new(settings_on_ephemeral_port());
        let readiness = server.state().readiness.clone();
        assert!(!readiness.is_ready());

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(Box::new(server).run(shutdown.clone()));

        let became_ready = tokio::time::timeout(Duration::from_secs(5), async {
            while !readiness.is_ready() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(became_ready.is_ok());

        shutdown.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), task).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
    }

    #[tokio::test]
    async fn bind_failure_is_an_http_error() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port().to_string();
        let env = RawEnv::from_pairs([
            ("JWT_SECRET_KEY", "k"),
            ("API_HOST", "127.0.0.1"),
            ("API_PORT", port.as_str()),
        ]);
        let server = ApiServer::new(Arc::new(load_from(&env).unwrap()));
        let err = Box::new(server)
            .run(CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("bind failed"));
    }
}
