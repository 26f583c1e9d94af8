//! Bounded, fixed-interval retry for backend connections at startup.

use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

use crate::config::WorkerConfig;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &WorkerConfig) -> Self {
        Self {
            max_retries: cfg.connect_max_retries,
            interval: Duration::from_secs(cfg.connect_retry_interval_seconds),
        }
    }
}

/// Run `connect` until it succeeds or the policy is exhausted.
///
/// Configuration errors are returned immediately; retrying cannot fix a bad
/// URL. After exhaustion the last error is returned.
pub async fn connect_with_retry<T, F, Fut>(
    what: &str,
    policy: RetryPolicy,
    mut connect: F,
) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let attempts = policy.max_retries.saturating_add(1);
    let mut attempt = 1;

    loop {
        match connect().await {
            Ok(v) => return Ok(v),
            Err(e @ AppError::Config(_)) => return Err(e),
            Err(e) if attempt >= attempts => {
                error!(%what, attempts, error = %e, "connection retries exhausted");
                return Err(e);
            }
            Err(e) => {
                warn!(
                    %what,
                    attempt,
                    max_attempts = attempts,
                    retry_in_secs = policy.interval.as_secs_f64(),
                    error = %e,
                    "connection failed, retrying"
                );
                tokio::time::sleep(policy.interval).await;
                attempt += 1;
            }
        }
    }
}
