//! SQLite-backed broker and result store.
//!
//! Each call opens its own connection, so several processes (API, worker,
//! `call` client) can share one file. WAL plus a busy timeout keeps writers
//! from failing under light contention. Broker and result tables may live in
//! the same file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::error::AppError;
use crate::worker::protocol::TaskResult;

use super::{Broker, Delivery, ResultStore};

fn open_conn(db_path: &Path) -> Result<Connection, String> {
    let conn =
        Connection::open(db_path).map_err(|e| format!("open {}: {e}", db_path.display()))?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| format!("set journal_mode WAL: {e}"))?;
    conn.pragma_update(None, "busy_timeout", 5000)
        .map_err(|e| format!("set busy_timeout: {e}"))?;
    Ok(conn)
}

fn ensure_parent(db_path: &Path) -> Result<(), String> {
    match db_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => fs::create_dir_all(dir)
            .map_err(|e| format!("cannot create {}: {e}", dir.display())),
        _ => Ok(()),
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

// ── SqliteBroker ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SqliteBroker {
    db_path: PathBuf,
}

impl SqliteBroker {
    pub fn open(db_path: &Path) -> Result<Self, AppError> {
        ensure_parent(db_path).map_err(|e| AppError::Broker(format!("sqlite: {e}")))?;
        let broker = Self { db_path: db_path.to_path_buf() };
        broker.init_db()?;
        Ok(broker)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> Result<Connection, AppError> {
        open_conn(&self.db_path).map_err(|e| AppError::Broker(format!("sqlite: {e}")))
    }

    fn init_db(&self) -> Result<(), AppError> {
        self.conn()?
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS task_queue (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    body TEXT NOT NULL,
                    enqueued_at INTEGER NOT NULL,
                    reserved_at INTEGER
                );
                CREATE INDEX IF NOT EXISTS task_queue_ready
                    ON task_queue (reserved_at, id);
                ",
            )
            .map_err(|e| AppError::Broker(format!("sqlite: initialize schema: {e}")))
    }
}

impl Broker for SqliteBroker {
    fn kind(&self) -> &str {
        "sqlite"
    }

    fn ping(&self) -> Result<(), AppError> {
        self.conn()?
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map(|_| ())
            .map_err(|e| AppError::Broker(format!("sqlite: ping: {e}")))
    }

    fn publish(&self, body: &str) -> Result<(), AppError> {
        self.conn()?
            .execute(
                "INSERT INTO task_queue (body, enqueued_at) VALUES (?1, ?2)",
                params![body, now_ms()],
            )
            .map_err(|e| AppError::Broker(format!("sqlite: publish: {e}")))?;
        Ok(())
    }

    fn reserve(&self) -> Result<Option<Delivery>, AppError> {
        // A single UPDATE takes the write lock, so two consumers never claim
        // the same row.
        let row = self
            .conn()?
            .query_row(
                "UPDATE task_queue SET reserved_at = ?1
                 WHERE id = (
                     SELECT id FROM task_queue
                     WHERE reserved_at IS NULL
                     ORDER BY id LIMIT 1
                 )
                 RETURNING id, body",
                params![now_ms()],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .map_err(|e| AppError::Broker(format!("sqlite: reserve: {e}")))?;

        Ok(row.map(|(id, body)| Delivery { id: id as u64, body }))
    }

    fn ack(&self, delivery_id: u64) -> Result<(), AppError> {
        self.conn()?
            .execute(
                "DELETE FROM task_queue WHERE id = ?1",
                params![delivery_id as i64],
            )
            .map_err(|e| AppError::Broker(format!("sqlite: ack {delivery_id}: {e}")))?;
        Ok(())
    }

    fn requeue(&self, delivery_id: u64) -> Result<(), AppError> {
        self.conn()?
            .execute(
                "UPDATE task_queue SET reserved_at = NULL WHERE id = ?1",
                params![delivery_id as i64],
            )
            .map_err(|e| AppError::Broker(format!("sqlite: requeue {delivery_id}: {e}")))?;
        Ok(())
    }

    fn recover_unacked(&self, older_than: Duration) -> Result<usize, AppError> {
        let cutoff = now_ms().saturating_sub(older_than.as_millis() as i64);
        self.conn()?
            .execute(
                "UPDATE task_queue SET reserved_at = NULL
                 WHERE reserved_at IS NOT NULL AND reserved_at <= ?1",
                params![cutoff],
            )
            .map_err(|e| AppError::Broker(format!("sqlite: recover unacked: {e}")))
    }
}

// ── SqliteResultStore ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SqliteResultStore {
    db_path: PathBuf,
}

impl SqliteResultStore {
    pub fn open(db_path: &Path) -> Result<Self, AppError> {
        ensure_parent(db_path).map_err(|e| AppError::ResultStore(format!("sqlite: {e}")))?;
        let store = Self { db_path: db_path.to_path_buf() };
        store.init_db()?;
        Ok(store)
    }

    fn conn(&self) -> Result<Connection, AppError> {
        open_conn(&self.db_path).map_err(|e| AppError::ResultStore(format!("sqlite: {e}")))
    }

    fn init_db(&self) -> Result<(), AppError> {
        self.conn()?
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS task_results (
                    task_id TEXT PRIMARY KEY,
                    state TEXT NOT NULL,
                    body TEXT NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                ",
            )
            .map_err(|e| AppError::ResultStore(format!("sqlite: initialize schema: {e}")))
    }
}

impl ResultStore for SqliteResultStore {
    fn kind(&self) -> &str {
        "sqlite"
    }

    fn ping(&self) -> Result<(), AppError> {
        self.conn()?
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map(|_| ())
            .map_err(|e| AppError::ResultStore(format!("sqlite: ping: {e}")))
    }

    fn store(&self, result: &TaskResult) -> Result<(), AppError> {
        let body = result.encode()?;
        self.conn()?
            .execute(
                "INSERT INTO task_results (task_id, state, body, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (task_id) DO UPDATE SET
                     state = excluded.state,
                     body = excluded.body,
                     updated_at = excluded.updated_at",
                params![
                    result.task_id.to_string(),
                    result.state.as_str(),
                    body,
                    now_ms()
                ],
            )
            .map_err(|e| AppError::ResultStore(format!("sqlite: store {}: {e}", result.task_id)))?;
        Ok(())
    }

    fn get(&self, task_id: Uuid) -> Result<Option<TaskResult>, AppError> {
        let body: Option<String> = self
            .conn()?
            .query_row(
                "SELECT body FROM task_results WHERE task_id = ?1",
                params![task_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| AppError::ResultStore(format!("sqlite: get {task_id}: {e}")))?;

        body.map(|b| TaskResult::decode(&b)).transpose()
    }
}
