//! Async handles over the blocking backend traits.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::error::AppError;
use crate::worker::protocol::TaskResult;

use super::{Broker, Delivery, ResultStore, open_broker, open_result_store};

/// Cheap-to-clone async view of a [`Broker`].
#[derive(Clone)]
pub struct BrokerHandle {
    inner: Arc<dyn Broker>,
}

impl BrokerHandle {
    pub fn new(inner: Arc<dyn Broker>) -> Self {
        Self { inner }
    }

    /// Open the backend named by `url` and probe it once.
    pub async fn connect(url: &str) -> Result<Self, AppError> {
        let url = url.to_string();
        let inner = tokio::task::spawn_blocking(move || {
            let broker = open_broker(&url)?;
            broker.ping()?;
            Ok::<_, AppError>(broker)
        })
        .await
        .map_err(|e| AppError::Broker(format!("connect join: {e}")))??;
        Ok(Self { inner })
    }

    pub fn kind(&self) -> &str {
        self.inner.kind()
    }

    pub async fn publish(&self, body: String) -> Result<(), AppError> {
        let broker = self.inner.clone();
        tokio::task::spawn_blocking(move || broker.publish(&body))
            .await
            .map_err(|e| AppError::Broker(format!("publish join: {e}")))?
    }

    pub async fn reserve(&self) -> Result<Option<Delivery>, AppError> {
        let broker = self.inner.clone();
        tokio::task::spawn_blocking(move || broker.reserve())
            .await
            .map_err(|e| AppError::Broker(format!("reserve join: {e}")))?
    }

    pub async fn ack(&self, delivery_id: u64) -> Result<(), AppError> {
        let broker = self.inner.clone();
        tokio::task::spawn_blocking(move || broker.ack(delivery_id))
            .await
            .map_err(|e| AppError::Broker(format!("ack join: {e}")))?
    }

    pub async fn requeue(&self, delivery_id: u64) -> Result<(), AppError> {
        let broker = self.inner.clone();
        tokio::task::spawn_blocking(move || broker.requeue(delivery_id))
            .await
            .map_err(|e| AppError::Broker(format!("requeue join: {e}")))?
    }

    pub async fn recover_unacked(&self, older_than: Duration) -> Result<usize, AppError> {
        let broker = self.inner.clone();
        tokio::task::spawn_blocking(move || broker.recover_unacked(older_than))
            .await
            .map_err(|e| AppError::Broker(format!("recover join: {e}")))?
    }
}

/// Cheap-to-clone async view of a [`ResultStore`].
#[derive(Clone)]
pub struct ResultHandle {
    inner: Arc<dyn ResultStore>,
}

impl ResultHandle {
    pub fn new(inner: Arc<dyn ResultStore>) -> Self {
        Self { inner }
    }

    pub async fn connect(url: &str) -> Result<Self, AppError> {
        let url = url.to_string();
        let inner = tokio::task::spawn_blocking(move || {
            let store = open_result_store(&url)?;
            store.ping()?;
            Ok::<_, AppError>(store)
        })
        .await
        .map_err(|e| AppError::ResultStore(format!("connect join: {e}")))??;
        Ok(Self { inner })
    }

    pub fn kind(&self) -> &str {
        self.inner.kind()
    }

    pub async fn store(&self, result: TaskResult) -> Result<(), AppError> {
        let store = self.inner.clone();
        tokio::task::spawn_blocking(move || store.store(&result))
            .await
            .map_err(|e| AppError::ResultStore(format!("store join: {e}")))?
    }

    pub async fn get(&self, task_id: Uuid) -> Result<Option<TaskResult>, AppError> {
        let store = self.inner.clone();
        tokio::task::spawn_blocking(move || store.get(task_id))
            .await
            .map_err(|e| AppError::ResultStore(format!("get join: {e}")))?
    }
}
