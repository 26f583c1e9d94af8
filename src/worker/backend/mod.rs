//! Broker and result-store backends, selected by URL scheme.
//!
//! ```text
//! memory://          in-process queue / result map
//! sqlite://<path>    durable tables in a SQLite file (WAL)
//! ```
//!
//! Backends are `Send + Sync` and do blocking I/O. The async
//! [`BrokerHandle`] and [`ResultHandle`] wrap every call in
//! `spawn_blocking`.

mod handle;
mod memory;
mod sqlite;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::config::expand_home;
use crate::error::AppError;

use super::protocol::TaskResult;

pub use handle::{BrokerHandle, ResultHandle};
pub use memory::{MemoryBroker, MemoryResultStore};
pub use sqlite::{SqliteBroker, SqliteResultStore};

/// A reserved message. `id` is only meaningful to the broker that issued it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: u64,
    pub body: String,
}

/// FIFO task queue with explicit acknowledgement.
pub trait Broker: Send + Sync {
    /// Backend name for log messages (`"memory"`, `"sqlite"`).
    fn kind(&self) -> &str;

    /// Cheap liveness probe used by the startup connect loop.
    fn ping(&self) -> Result<(), AppError>;

    fn publish(&self, body: &str) -> Result<(), AppError>;

    /// Take the oldest ready message, or `None` if the queue is empty. The
    /// message stays owned by the caller until `ack` or `requeue`.
    fn reserve(&self) -> Result<Option<Delivery>, AppError>;

    fn ack(&self, delivery_id: u64) -> Result<(), AppError>;

    fn requeue(&self, delivery_id: u64) -> Result<(), AppError>;

    /// Return messages reserved at least `older_than` ago to the ready queue.
    /// Returns how many were moved.
    fn recover_unacked(&self, older_than: Duration) -> Result<usize, AppError>;
}

/// Task-id keyed result storage. Later writes replace earlier ones.
pub trait ResultStore: Send + Sync {
    fn kind(&self) -> &str;

    fn ping(&self) -> Result<(), AppError>;

    fn store(&self, result: &TaskResult) -> Result<(), AppError>;

    fn get(&self, task_id: Uuid) -> Result<Option<TaskResult>, AppError>;
}

// ── URL parsing ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendUrl {
    Memory,
    Sqlite(PathBuf),
}

impl BackendUrl {
    pub fn parse(url: &str) -> Result<Self, AppError> {
        let url = url.trim();
        let Some((scheme, rest)) = url.split_once("://") else {
            return Err(AppError::Config(format!("backend url '{url}' has no scheme")));
        };

        match scheme.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "sqlite" => {
                if rest.is_empty() {
                    return Err(AppError::Config(format!("backend url '{url}' has no path")));
                }
                Ok(Self::Sqlite(expand_home(rest)))
            }
            other => Err(AppError::Config(format!(
                "unsupported backend scheme '{other}' in '{url}' (expected memory:// or sqlite://)"
            ))),
        }
    }
}

pub fn open_broker(url: &str) -> Result<Arc<dyn Broker>, AppError> {
    match BackendUrl::parse(url)? {
        BackendUrl::Memory => Ok(Arc::new(MemoryBroker::new())),
        BackendUrl::Sqlite(path) => Ok(Arc::new(SqliteBroker::open(&path)?)),
    }
}

pub fn open_result_store(url: &str) -> Result<Arc<dyn ResultStore>, AppError> {
    match BackendUrl::parse(url)? {
        BackendUrl::Memory => Ok(Arc::new(MemoryResultStore::new())),
        BackendUrl::Sqlite(path) => Ok(Arc::new(SqliteResultStore::open(&path)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_memory_and_sqlite() {
        assert_eq!(BackendUrl::parse("memory://").unwrap(), BackendUrl::Memory);
        assert_eq!(
            BackendUrl::parse("sqlite://data/broker.db").unwrap(),
            BackendUrl::Sqlite(PathBuf::from("data/broker.db"))
        );
        assert_eq!(
            BackendUrl::parse("SQLITE:///var/lib/q.db").unwrap(),
            BackendUrl::Sqlite(PathBuf::from("/var/lib/q.db"))
        );
    }

    #[test]
    fn redis_scheme_is_a_config_error() {
        let err = BackendUrl::parse("redis://redis:6379/0").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
        assert!(err.to_string().contains("unsupported backend scheme 'redis'"));
    }

    #[test]
    fn missing_scheme_or_path_is_rejected() {
        assert!(matches!(BackendUrl::parse("data/broker.db"), Err(AppError::Config(_))));
        assert!(matches!(BackendUrl::parse("sqlite://"), Err(AppError::Config(_))));
    }

    #[test]
    fn open_memory_backends() {
        assert_eq!(open_broker("memory://").unwrap().kind(), "memory");
        assert_eq!(open_result_store("memory://").unwrap().kind(), "memory");
    }
}
