//! Background task worker.
//!
//! A [`WorkerApp`] bundles the broker, the result store and the task
//! registry. Producers call [`WorkerApp::send_task`]; worker processes run
//! the components from [`WorkerApp::components`]: `worker_concurrency`
//! consumer loops plus one reaper that redelivers messages whose consumer
//! never acknowledged them.
//!
//! ```text
//! send_task ──publish──▶ broker ──reserve──▶ consumer ──run──▶ Task
//!     │                                         │
//!     └──── AsyncResult ◀──get── result store ◀─┘ STARTED / SUCCESS / FAILURE
//! ```

pub mod backend;
mod client;
mod consumer;
pub mod protocol;
pub mod retry;
pub mod task;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Settings;
use crate::error::AppError;
use crate::runtime::Component;

use backend::{BrokerHandle, ResultHandle};
use protocol::TaskMessage;
use retry::{RetryPolicy, connect_with_retry};
use task::{PingTask, TaskRegistry};

pub use client::AsyncResult;
pub use consumer::{Consumer, Reaper};

/// Delivery and serialization behaviour of a worker app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOptions {
    pub task_serializer: &'static str,
    pub result_serializer: &'static str,
    pub accept_content: &'static [&'static str],
    pub timezone: &'static str,
    pub enable_utc: bool,
    /// Record `STARTED` before running a task.
    pub track_started: bool,
    /// Messages reserved per consumer at a time.
    pub prefetch_multiplier: u32,
    /// Acknowledge after the task finishes rather than on receipt.
    pub acks_late: bool,
    pub connection_retry_on_startup: bool,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            task_serializer: "json",
            result_serializer: "json",
            accept_content: &["json"],
            timezone: "UTC",
            enable_utc: true,
            track_started: true,
            prefetch_multiplier: 1,
            acks_late: true,
            connection_retry_on_startup: true,
        }
    }
}

// ── WorkerApp ─────────────────────────────────────────────────────────────────

/// Cheap to clone; all clones share backends and registry.
#[derive(Clone)]
pub struct WorkerApp {
    name: Arc<str>,
    options: WorkerOptions,
    registry: Arc<TaskRegistry>,
    broker: BrokerHandle,
    results: ResultHandle,
    concurrency: u32,
    poll_interval: Duration,
    visibility_timeout: Duration,
}

impl WorkerApp {
    /// Connect to the configured broker and result store (retrying per
    /// settings) and register the built-in tasks.
    pub async fn new(name: &str, settings: &Settings) -> Result<Self, AppError> {
        Self::with_options(name, settings, WorkerOptions::default()).await
    }

    /// Like [`WorkerApp::new`] with explicit delivery options. Without
    /// `connection_retry_on_startup` the first failed connect is final.
    pub async fn with_options(
        name: &str,
        settings: &Settings,
        options: WorkerOptions,
    ) -> Result<Self, AppError> {
        let cfg = &settings.worker;

        let mut policy = RetryPolicy::from_config(cfg);
        if !options.connection_retry_on_startup {
            policy.max_retries = 0;
        }

        let broker_url = cfg.broker_url.as_str();
        let broker = connect_with_retry("broker", policy, move || {
            BrokerHandle::connect(broker_url)
        })
        .await?;

        let results_url = cfg.result_backend_url.as_str();
        let results = connect_with_retry("result_backend", policy, move || {
            ResultHandle::connect(results_url)
        })
        .await?;

        let mut registry = TaskRegistry::new();
        registry.register(Arc::new(PingTask))?;

        info!(
            app = name,
            broker = broker.kind(),
            result_backend = results.kind(),
            tasks = ?registry.names(),
            "worker app ready"
        );

        Ok(Self {
            name: Arc::from(name),
            options,
            registry: Arc::new(registry),
            broker,
            results,
            concurrency: cfg.concurrency.max(1),
            poll_interval: Duration::from_millis(cfg.poll_interval_ms),
            visibility_timeout: Duration::from_secs(cfg.visibility_timeout_seconds),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn broker(&self) -> &BrokerHandle {
        &self.broker
    }

    pub fn results(&self) -> &ResultHandle {
        &self.results
    }

    /// Enqueue `task` by name. The name is not checked locally; a worker
    /// without it records `FAILURE`.
    pub async fn send_task(
        &self,
        task: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<AsyncResult, AppError> {
        let msg = TaskMessage::new(task, args, kwargs);
        self.broker.publish(msg.encode()?).await?;
        debug!(task_id = %msg.id, task, "task published");
        Ok(self.async_result(msg.id))
    }

    pub fn async_result(&self, task_id: Uuid) -> AsyncResult {
        AsyncResult::new(task_id, self.results.clone())
    }

    /// Reserve and fully process at most one message. Returns `false` when
    /// the queue was empty.
    pub async fn process_next(&self) -> Result<bool, AppError> {
        match self.broker.reserve().await? {
            Some(delivery) => {
                consumer::handle_delivery(self, delivery).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// One consumer per unit of concurrency, plus the reaper.
    pub fn components(&self) -> Vec<Box<dyn Component>> {
        let mut out: Vec<Box<dyn Component>> = (0..self.concurrency)
            .map(|i| {
                Box::new(Consumer::new(i, self.clone(), self.poll_interval)) as Box<dyn Component>
            })
            .collect();
        out.push(Box::new(Reaper::new(self.broker.clone(), self.visibility_timeout)));
        out
    }
}
