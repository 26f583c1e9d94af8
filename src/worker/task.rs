//! Task definitions and the name → task registry.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::AppError;

pub type TaskFuture = Pin<Box<dyn Future<Output = Result<Value, TaskError>> + Send + 'static>>;

/// Raised by a task body; recorded as a `FAILURE` result, never fatal to the
/// worker.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Failed(String),
}

/// A named unit of work executed by the worker.
pub trait Task: Send + Sync {
    /// Registered name, e.g. `"health.ping"`.
    fn name(&self) -> &str;

    fn run(&self, args: Vec<Value>, kwargs: Map<String, Value>) -> TaskFuture;
}

// ── Registry ──────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, Arc<dyn Task>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, task: Arc<dyn Task>) -> Result<(), AppError> {
        let name = task.name().to_string();
        if self.tasks.contains_key(&name) {
            return Err(AppError::Task(format!("task '{name}' is already registered")));
        }
        self.tasks.insert(name, task);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Task>> {
        self.tasks.get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tasks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

// ── Built-in tasks ────────────────────────────────────────────────────────────

pub const PING_TASK: &str = "health.ping";

/// Liveness probe for the worker pipeline. Takes no arguments, returns
/// `"pong"`.
pub struct PingTask;

impl Task for PingTask {
    fn name(&self) -> &str {
        PING_TASK
    }

    fn run(&self, args: Vec<Value>, kwargs: Map<String, Value>) -> TaskFuture {
        Box::pin(async move {
            if !args.is_empty() || !kwargs.is_empty() {
                return Err(TaskError::InvalidArguments(format!(
                    "{PING_TASK} takes no arguments"
                )));
            }
            Ok(Value::String("pong".into()))
        })
    }
}
