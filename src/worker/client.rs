use std::time::Duration;

use uuid::Uuid;

use crate::error::AppError;

use super::backend::ResultHandle;
use super::protocol::{TaskResult, TaskState};

/// Producer-side view of one sent task.
#[derive(Clone)]
pub struct AsyncResult {
    id: Uuid,
    results: ResultHandle,
}

impl AsyncResult {
    pub(super) fn new(id: Uuid, results: ResultHandle) -> Self {
        Self { id, results }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// `PENDING` until the worker has recorded anything.
    pub async fn state(&self) -> Result<TaskState, AppError> {
        Ok(self
            .results
            .get(self.id)
            .await?
            .map_or(TaskState::Pending, |r| r.state))
    }

    pub async fn get(&self) -> Result<Option<TaskResult>, AppError> {
        self.results.get(self.id).await
    }

    /// Poll every `poll` until the task reaches `SUCCESS` or `FAILURE`.
    pub async fn wait(&self, timeout: Duration, poll: Duration) -> Result<TaskResult, AppError> {
        let waiting = async {
            loop {
                if let Some(r) = self.results.get(self.id).await? {
                    if r.state.is_terminal() {
                        return Ok::<_, AppError>(r);
                    }
                }
                tokio::time::sleep(poll).await;
            }
        };

        tokio::time::timeout(timeout, waiting).await.map_err(|_| {
            AppError::Task(format!(
                "timed out after {}s waiting for task {}",
                timeout.as_secs_f64(),
                self.id
            ))
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::backend::MemoryResultStore;
    use serde_json::json;
    use std::sync::Arc;

    fn handle() -> ResultHandle {
        ResultHandle::new(Arc::new(MemoryResultStore::new()))
    }

    #[tokio::test]
    async fn unknown_id_is_pending() {
        let r = AsyncResult::new(Uuid::new_v4(), handle());
        assert_eq!(r.state().await.unwrap(), TaskState::Pending);
        assert!(r.get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn wait_skips_started_and_returns_terminal() {
        let results = handle();
        let id = Uuid::new_v4();
        results.store(TaskResult::started(id)).await.unwrap();

        let r = AsyncResult::new(id, results.clone());
        assert_eq!(r.state().await.unwrap(), TaskState::Started);

        let writer = results.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.store(TaskResult::success(id, json!("pong"))).await.unwrap();
        });

        let done = r
            .wait(Duration::from_secs(5), Duration::from_millis(5))
            .await
            .unwrap();
        assert_eq!(done.state, TaskState::Success);
        assert_eq!(r.id(), id);
    }

    #[tokio::test]
    async fn wait_times_out() {
        let r = AsyncResult::new(Uuid::new_v4(), handle());
        let err = r
            .wait(Duration::from_millis(30), Duration::from_millis(5))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
