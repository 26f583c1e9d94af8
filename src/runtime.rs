//! Process runtime — component spawning and shutdown wiring.
//!
//! # Component model
//!
//! A [`Component`] is any independently-runnable unit of a process: the HTTP
//! server, one task-consumer loop, and so on. Entry points construct
//! components with their shared state already captured inside them, then
//! hand them to [`spawn_components`].
//!
//! # RuntimeHandle
//!
//! [`spawn_components`] returns a [`RuntimeHandle`] that the caller can
//! `.join()` (blocking until all components finish) while the components run
//! concurrently. Any component error cancels the shared
//! [`CancellationToken`] so sibling components shut down cleanly.

use std::future::Future;
use std::pin::Pin;

use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::AppError;

// ── Component ─────────────────────────────────────────────────────────────────

/// A boxed, owned future returned by [`Component::run`].
pub type ComponentFuture = Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'static>>;

/// A self-contained, concurrently-runnable unit of a process.
///
/// Implementors capture all shared state at construction time.
/// [`Component::run`] is called once by [`spawn_components`] and should run
/// until `shutdown` is cancelled or the component's own work is done.
pub trait Component: Send + 'static {
    /// Stable identifier used in log messages.
    fn id(&self) -> &str;

    /// Consume the component and return its async run-loop as a boxed future.
    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture;
}

// ── RuntimeHandle ─────────────────────────────────────────────────────────────

/// An opaque handle to a running component set.
pub struct RuntimeHandle {
    inner: JoinHandle<Result<(), AppError>>,
}

impl RuntimeHandle {
    /// Await all components and return the first error, if any.
    pub async fn join(self) -> Result<(), AppError> {
        match self.inner.await {
            Ok(r) => r,
            Err(e) => Err(AppError::Runtime(format!("component manager panicked: {e}"))),
        }
    }
}

// ── spawn_components ──────────────────────────────────────────────────────────

/// Spawn each [`Component`] as an independent Tokio task and return a
/// [`RuntimeHandle`] that resolves when all components have exited.
///
/// Behaviour on error:
/// - If any component returns `Err` or panics, `shutdown` is cancelled so all
///   siblings receive the cancellation signal and stop cooperatively.
/// - The manager task then drains the remaining components and returns the
///   first error encountered.
pub fn spawn_components(
    components: Vec<Box<dyn Component>>,
    shutdown: CancellationToken,
) -> RuntimeHandle {
    let handle = tokio::spawn(async move {
        let mut set: JoinSet<Result<(), AppError>> = JoinSet::new();

        for component in components {
            let id = component.id().to_string();
            debug!(component = %id, "spawning component");
            set.spawn(component.run(shutdown.clone()));
        }

        let mut first_err: Option<AppError> = None;

        while let Some(res) = set.join_next().await {
            match res {
                Err(e) => {
                    error!("component panicked: {e}");
                    shutdown.cancel();
                    first_err.get_or_insert_with(|| {
                        AppError::Runtime(format!("component panicked: {e}"))
                    });
                }
                Ok(Err(e)) => {
                    error!("component error: {e}");
                    shutdown.cancel();
                    first_err.get_or_insert(e);
                }
                Ok(Ok(())) => {}
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    });

    RuntimeHandle { inner: handle }
}

// ── Signals ───────────────────────────────────────────────────────────────────

/// Cancel `shutdown` on Ctrl-C, or SIGTERM on unix.
pub fn spawn_signal_watcher(shutdown: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = ctrl_c() => info!("ctrl-c received, initiating shutdown"),
            _ = terminate() => info!("SIGTERM received, initiating shutdown"),
            _ = shutdown.cancelled() => return,
        }
        shutdown.cancel();
    });
}

async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sig) => {
            sig.recv().await;
        }
        Err(_) => std::future::pending::<()>().await,
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await
}
