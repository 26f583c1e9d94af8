//! Wire types exchanged through the broker and the result store.
//!
//! Messages and results are JSON documents; no other serializer is accepted.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::AppError;

// ── TaskMessage ───────────────────────────────────────────────────────────────

/// One queued task invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub id: Uuid,
    pub task: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
    pub enqueued_at: DateTime<Utc>,
}

impl TaskMessage {
    pub fn new(task: impl Into<String>, args: Vec<Value>, kwargs: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task: task.into(),
            args,
            kwargs,
            enqueued_at: Utc::now(),
        }
    }

    pub fn encode(&self) -> Result<String, AppError> {
        serde_json::to_string(self).map_err(|e| AppError::Task(format!("encode message: {e}")))
    }

    pub fn decode(body: &str) -> Result<Self, AppError> {
        serde_json::from_str(body).map_err(|e| AppError::Task(format!("decode message: {e}")))
    }
}

// ── TaskState ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    /// Unknown to the result store: queued, or never sent.
    Pending,
    Started,
    Success,
    Failure,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Started => "STARTED",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "STARTED" => Ok(Self::Started),
            "SUCCESS" => Ok(Self::Success),
            "FAILURE" => Ok(Self::Failure),
            other => Err(format!("unknown task state '{other}'")),
        }
    }
}

// ── TaskResult ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: Uuid,
    pub state: TaskState,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    pub date_done: DateTime<Utc>,
}

impl TaskResult {
    pub fn started(task_id: Uuid) -> Self {
        Self::with_state(task_id, TaskState::Started, None, None)
    }

    pub fn success(task_id: Uuid, value: Value) -> Self {
        Self::with_state(task_id, TaskState::Success, Some(value), None)
    }

    pub fn failure(task_id: Uuid, error: impl Into<String>) -> Self {
        Self::with_state(task_id, TaskState::Failure, None, Some(error.into()))
    }

    fn with_state(
        task_id: Uuid,
        state: TaskState,
        result: Option<Value>,
        error: Option<String>,
    ) -> Self {
        Self {
            task_id,
            state,
            result,
            error,
            date_done: Utc::now(),
        }
    }

    pub fn encode(&self) -> Result<String, AppError> {
        serde_json::to_string(self)
            .map_err(|e| AppError::ResultStore(format!("encode result: {e}")))
    }

    pub fn decode(body: &str) -> Result<Self, AppError> {
        serde_json::from_str(body)
            .map_err(|e| AppError::ResultStore(format!("decode result: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_missing_args_defaults_to_empty() {
        let id = Uuid::new_v4();
        let body = format!(
            r#"{{"id":"{id}","task":"health.ping","enqueued_at":"2024-01-01T00:00:00Z"}}"#
        );
        let msg = TaskMessage::decode(&body).unwrap();
        assert_eq!(msg.id, id);
        assert!(msg.args.is_empty());
        assert!(msg.kwargs.is_empty());
    }

    #[test]
    fn non_json_message_is_a_task_error() {
        let err = TaskMessage::decode("\u{80}pickle").unwrap_err();
        assert!(matches!(err, AppError::Task(_)));
    }

    #[test]
    fn state_serializes_uppercase() {
        let r = TaskResult::success(Uuid::nil(), json!("pong"));
        let v: Value = serde_json::from_str(&r.encode().unwrap()).unwrap();
        assert_eq!(v["state"], "SUCCESS");
        assert_eq!(v["result"], "pong");
        assert!(v["error"].is_null());
    }

    #[test]
    fn only_success_and_failure_are_terminal() {
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Started.is_terminal());
        assert!(TaskState::Success.is_terminal());
        assert!(TaskState::Failure.is_terminal());
    }

    #[test]
    fn state_parses_from_display() {
        for s in [
            TaskState::Pending,
            TaskState::Started,
            TaskState::Success,
            TaskState::Failure,
        ] {
            assert_eq!(s.to_string().parse::<TaskState>().unwrap(), s);
        }
        assert!("done".parse::<TaskState>().is_err());
    }
}
