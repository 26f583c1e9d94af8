//! In-process backends. State lives only as long as the owning `Arc`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::error::AppError;
use crate::worker::protocol::TaskResult;

use super::{Broker, Delivery, ResultStore};

// ── MemoryBroker ──────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryBroker {
    queue: Mutex<MemoryQueue>,
}

#[derive(Default)]
struct MemoryQueue {
    next_id: u64,
    ready: VecDeque<Delivery>,
    reserved: HashMap<u64, (String, Instant)>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryQueue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Broker for MemoryBroker {
    fn kind(&self) -> &str {
        "memory"
    }

    fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }

    fn publish(&self, body: &str) -> Result<(), AppError> {
        let mut q = self.lock();
        q.next_id += 1;
        let id = q.next_id;
        q.ready.push_back(Delivery { id, body: body.to_string() });
        Ok(())
    }

    fn reserve(&self) -> Result<Option<Delivery>, AppError> {
        let mut q = self.lock();
        let Some(delivery) = q.ready.pop_front() else {
            return Ok(None);
        };
        q.reserved
            .insert(delivery.id, (delivery.body.clone(), Instant::now()));
        Ok(Some(delivery))
    }

    fn ack(&self, delivery_id: u64) -> Result<(), AppError> {
        self.lock().reserved.remove(&delivery_id);
        Ok(())
    }

    fn requeue(&self, delivery_id: u64) -> Result<(), AppError> {
        let mut q = self.lock();
        if let Some((body, _)) = q.reserved.remove(&delivery_id) {
            q.ready.push_back(Delivery { id: delivery_id, body });
        }
        Ok(())
    }

    fn recover_unacked(&self, older_than: Duration) -> Result<usize, AppError> {
        let mut q = self.lock();
        let mut expired: Vec<u64> = q
            .reserved
            .iter()
            .filter(|(_, (_, at))| at.elapsed() >= older_than)
            .map(|(id, _)| *id)
            .collect();
        expired.sort_unstable();

        for id in &expired {
            if let Some((body, _)) = q.reserved.remove(id) {
                q.ready.push_back(Delivery { id: *id, body });
            }
        }
        Ok(expired.len())
    }
}

// ── MemoryResultStore ─────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryResultStore {
    results: Mutex<HashMap<Uuid, TaskResult>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultStore for MemoryResultStore {
    fn kind(&self) -> &str {
        "memory"
    }

    fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }

    fn store(&self, result: &TaskResult) -> Result<(), AppError> {
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(result.task_id, result.clone());
        Ok(())
    }

    fn get(&self, task_id: Uuid) -> Result<Option<TaskResult>, AppError> {
        Ok(self
            .results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&task_id)
            .cloned())
    }
}
