//! Consumer loops and the unacked-message reaper.

use std::time::{Duration, Instant};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::runtime::{Component, ComponentFuture};

use super::WorkerApp;
use super::backend::{BrokerHandle, Delivery};
use super::protocol::{TaskMessage, TaskResult, TaskState};

/// Reaper wake-up cap, so short timeouts in tests and long ones in
/// production both get timely recovery.
const MAX_REAP_INTERVAL: Duration = Duration::from_secs(60);

// ── Message handling ──────────────────────────────────────────────────────────

/// Execute one delivery and record its outcome.
///
/// Returns `Err` only when the broker or result store failed; task failures
/// are recorded as `FAILURE` results.
pub(super) async fn handle_delivery(app: &WorkerApp, delivery: Delivery) -> Result<(), AppError> {
    let msg = match TaskMessage::decode(&delivery.body) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(delivery_id = delivery.id, error = %e, "discarding undecodable message");
            if let Some(task_id) = salvage_task_id(&delivery.body) {
                app.results
                    .store(TaskResult::failure(task_id, e.to_string()))
                    .await?;
            }
            return app.broker.ack(delivery.id).await;
        }
    };

    let opts = app.options();
    if !opts.acks_late {
        app.broker.ack(delivery.id).await?;
    }

    info!(task_id = %msg.id, task = %msg.task, "task received");
    if opts.track_started {
        app.results.store(TaskResult::started(msg.id)).await?;
    }

    let started = Instant::now();
    let result = match app.registry.get(&msg.task) {
        None => TaskResult::failure(msg.id, format!("unregistered task '{}'", msg.task)),
        Some(task) => {
            // Run on its own task so a panicking body fails the task, not the
            // consumer loop.
            match tokio::spawn(task.run(msg.args, msg.kwargs)).await {
                Ok(Ok(value)) => TaskResult::success(msg.id, value),
                Ok(Err(e)) => TaskResult::failure(msg.id, e.to_string()),
                Err(e) => TaskResult::failure(msg.id, format!("task panicked: {e}")),
            }
        }
    };

    let runtime_ms = started.elapsed().as_millis() as u64;
    match result.state {
        TaskState::Success => {
            info!(task_id = %msg.id, task = %msg.task, runtime_ms, "task succeeded")
        }
        _ => warn!(
            task_id = %msg.id,
            task = %msg.task,
            runtime_ms,
            error = result.error.as_deref().unwrap_or_default(),
            "task failed"
        ),
    }

    app.results.store(result).await?;

    if opts.acks_late {
        app.broker.ack(delivery.id).await?;
    }
    Ok(())
}

/// Best-effort task id from a body that failed full decoding.
fn salvage_task_id(body: &str) -> Option<Uuid> {
    let value: Value = serde_json::from_str(body).ok()?;
    value.get("id")?.as_str()?.parse().ok()
}

// ── Consumer ──────────────────────────────────────────────────────────────────

/// One sequential consumer: reserve, execute, acknowledge, repeat.
pub struct Consumer {
    id: String,
    app: WorkerApp,
    poll_interval: Duration,
}

impl Consumer {
    pub fn new(index: u32, app: WorkerApp, poll_interval: Duration) -> Self {
        Self {
            id: format!("consumer-{index}"),
            app,
            poll_interval,
        }
    }
}

impl Component for Consumer {
    fn id(&self) -> &str {
        &self.id
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(async move {
            debug!(consumer = %self.id, "consumer started");

            while !shutdown.is_cancelled() {
                let delivery = match self.app.broker.reserve().await {
                    Ok(d) => d,
                    Err(e) => {
                        warn!(consumer = %self.id, error = %e, "reserve failed");
                        None
                    }
                };

                let Some(delivery) = delivery else {
                    tokio::select! {
                        _ = shutdown.cancelled() => {}
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                    continue;
                };

                // A task in flight finishes before shutdown is observed.
                let delivery_id = delivery.id;
                if let Err(e) = handle_delivery(&self.app, delivery).await {
                    error!(
                        consumer = %self.id,
                        delivery_id,
                        error = %e,
                        "delivery failed, requeueing"
                    );
                    if let Err(e) = self.app.broker.requeue(delivery_id).await {
                        error!(consumer = %self.id, delivery_id, error = %e, "requeue failed");
                    }
                }
            }

            debug!(consumer = %self.id, "consumer stopped");
            Ok(())
        })
    }
}

// ── Reaper ────────────────────────────────────────────────────────────────────

/// Periodically returns reserved-but-unacknowledged messages older than the
/// visibility timeout to the queue. The first sweep runs at startup.
pub struct Reaper {
    broker: BrokerHandle,
    visibility_timeout: Duration,
}

impl Reaper {
    pub fn new(broker: BrokerHandle, visibility_timeout: Duration) -> Self {
        Self { broker, visibility_timeout }
    }

    fn interval(&self) -> Duration {
        self.visibility_timeout
            .min(MAX_REAP_INTERVAL)
            .max(Duration::from_secs(1))
    }

    pub async fn sweep(&self) -> Result<usize, AppError> {
        let n = self.broker.recover_unacked(self.visibility_timeout).await?;
        if n > 0 {
            info!(
                recovered = n,
                visibility_timeout_secs = self.visibility_timeout.as_secs(),
                "redelivering unacknowledged messages"
            );
        }
        Ok(n)
    }
}

impl Component for Reaper {
    fn id(&self) -> &str {
        "reaper"
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> ComponentFuture {
        Box::pin(async move {
            let mut ticker = tokio::time::interval(self.interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep().await {
                            warn!(error = %e, "unacked recovery failed");
                        }
                    }
                }
            }
            Ok(())
        })
    }
}
