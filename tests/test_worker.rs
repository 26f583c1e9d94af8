//! Integration tests for the task worker over memory and SQLite backends.

use std::time::Duration;

use serde_json::{Map, json};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use retrievia::config::{RawEnv, Settings, load_from};
use retrievia::runtime::spawn_components;
use retrievia::worker::WorkerApp;
use retrievia::worker::backend::{Broker, SqliteBroker};
use retrievia::worker::protocol::{TaskMessage, TaskState};

// ── helpers ──────────────────────────────────────────────────────────────────

fn settings(broker: &str, results: &str, extra: &[(&str, &str)]) -> Settings {
    let mut pairs = vec![
        ("JWT_SECRET_KEY", "integration-secret"),
        ("BROKER_URL", broker),
        ("RESULT_BACKEND_URL", results),
        ("WORKER_POLL_INTERVAL_MS", "5"),
        ("WORKER_CONNECT_MAX_RETRIES", "0"),
    ];
    pairs.extend_from_slice(extra);
    load_from(&RawEnv::from_pairs(pairs)).expect("settings")
}

async fn memory_app() -> WorkerApp {
    WorkerApp::new("test-worker", &settings("memory://", "memory://", &[]))
        .await
        .expect("worker app")
}

fn sqlite_urls(tmp: &TempDir) -> (String, String) {
    (
        format!("sqlite://{}", tmp.path().join("broker.db").display()),
        format!("sqlite://{}", tmp.path().join("results.db").display()),
    )
}

const WAIT: Duration = Duration::from_secs(5);
const POLL: Duration = Duration::from_millis(10);

// ── memory backend ───────────────────────────────────────────────────────────

#[tokio::test]
async fn exactly_one_task_is_registered() {
    let app = memory_app().await;
    assert_eq!(app.registry().len(), 1);
    assert_eq!(app.registry().names(), vec!["health.ping"]);
}

#[tokio::test]
async fn ping_returns_pong() {
    let app = memory_app().await;
    let pending = app.send_task("health.ping", vec![], Map::new()).await.unwrap();
    assert_eq!(pending.state().await.unwrap(), TaskState::Pending);

    assert!(app.process_next().await.unwrap());

    let result = pending.wait(WAIT, POLL).await.unwrap();
    assert_eq!(result.state, TaskState::Success);
    assert_eq!(result.result, Some(json!("pong")));
    assert_eq!(result.task_id, pending.id());
}

#[tokio::test]
async fn ping_has_no_side_effects() {
    let app = memory_app().await;
    for _ in 0..3 {
        let pending = app.send_task("health.ping", vec![], Map::new()).await.unwrap();
        app.process_next().await.unwrap();
        assert_eq!(pending.state().await.unwrap(), TaskState::Success);
    }
    assert!(!app.process_next().await.unwrap());
    assert!(app.broker().reserve().await.unwrap().is_none());
}

#[tokio::test]
async fn unknown_task_fails() {
    let app = memory_app().await;
    let pending = app.send_task("reports.build", vec![], Map::new()).await.unwrap();
    app.process_next().await.unwrap();

    let result = pending.wait(WAIT, POLL).await.unwrap();
    assert_eq!(result.state, TaskState::Failure);
    assert!(result.error.unwrap().contains("unregistered task 'reports.build'"));
}

#[tokio::test]
async fn bad_arguments_fail_the_task() {
    let app = memory_app().await;
    let pending = app
        .send_task("health.ping", vec![json!("extra")], Map::new())
        .await
        .unwrap();
    app.process_next().await.unwrap();

    let result = pending.get().await.unwrap().unwrap();
    assert_eq!(result.state, TaskState::Failure);
    assert!(result.error.unwrap().contains("takes no arguments"));
}

#[tokio::test]
async fn undecodable_message_is_dropped() {
    let app = memory_app().await;
    app.broker().publish("{not json".into()).await.unwrap();

    assert!(app.process_next().await.unwrap());
    assert!(!app.process_next().await.unwrap());
}

#[tokio::test]
async fn partially_valid_message_records_failure() {
    let app = memory_app().await;
    let id = uuid::Uuid::new_v4();
    app.broker()
        .publish(format!(r#"{{"id":"{id}","task":7}}"#))
        .await
        .unwrap();
    app.process_next().await.unwrap();

    let result = app.async_result(id).get().await.unwrap().unwrap();
    assert_eq!(result.state, TaskState::Failure);
}

#[tokio::test]
async fn consumers_run_until_shutdown() {
    let app = WorkerApp::new(
        "test-worker",
        &settings("memory://", "memory://", &[("WORKER_CONCURRENCY", "2")]),
    )
    .await
    .unwrap();

    let shutdown = CancellationToken::new();
    let runtime = spawn_components(app.components(), shutdown.clone());

    let mut pending = Vec::new();
    for _ in 0..5 {
        pending.push(app.send_task("health.ping", vec![], Map::new()).await.unwrap());
    }
    for p in &pending {
        let r = p.wait(WAIT, POLL).await.unwrap();
        assert_eq!(r.state, TaskState::Success);
    }

    shutdown.cancel();
    tokio::time::timeout(WAIT, runtime.join())
        .await
        .expect("components stop")
        .unwrap();
}

// ── sqlite backend ───────────────────────────────────────────────────────────

#[tokio::test]
async fn sqlite_ping_round_trip_across_apps() {
    let tmp = TempDir::new().unwrap();
    let (broker, results) = sqlite_urls(&tmp);
    let cfg = settings(&broker, &results, &[]);

    let producer = WorkerApp::new("producer", &cfg).await.unwrap();
    let worker = WorkerApp::new("worker", &cfg).await.unwrap();

    let pending = producer.send_task("health.ping", vec![], Map::new()).await.unwrap();
    assert!(worker.process_next().await.unwrap());

    let result = pending.wait(WAIT, POLL).await.unwrap();
    assert_eq!(result.state, TaskState::Success);
    assert_eq!(result.result, Some(json!("pong")));
}

#[tokio::test]
async fn sqlite_redelivers_unacked_message() {
    let tmp = TempDir::new().unwrap();
    let (broker_url, results_url) = sqlite_urls(&tmp);
    let cfg = settings(
        &broker_url,
        &results_url,
        &[("WORKER_VISIBILITY_TIMEOUT_SECONDS", "1")],
    );

    let app = WorkerApp::new("w", &cfg).await.unwrap();
    let pending = app.send_task("health.ping", vec![], Map::new()).await.unwrap();

    // A consumer that reserved the message and then died without acking.
    let crashed = SqliteBroker::open(&tmp.path().join("broker.db")).unwrap();
    let lost = crashed.reserve().unwrap().unwrap();
    assert_eq!(TaskMessage::decode(&lost.body).unwrap().id, pending.id());
    drop(crashed);

    assert!(!app.process_next().await.unwrap());
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let shutdown = CancellationToken::new();
    let runtime = spawn_components(app.components(), shutdown.clone());

    let result = pending.wait(WAIT, POLL).await.unwrap();
    assert_eq!(result.state, TaskState::Success);

    shutdown.cancel();
    runtime.join().await.unwrap();
}

#[tokio::test]
async fn unreachable_sqlite_path_exhausts_retries() {
    let tmp = TempDir::new().unwrap();
    let blocker = tmp.path().join("file");
    std::fs::write(&blocker, "x").unwrap();
    let url = format!("sqlite://{}", blocker.join("broker.db").display());

    let cfg = settings(
        &url,
        "memory://",
        &[
            ("WORKER_CONNECT_MAX_RETRIES", "1"),
            ("WORKER_CONNECT_RETRY_INTERVAL_SECONDS", "0"),
        ],
    );
    let err = WorkerApp::new("w", &cfg).await.err().unwrap();
    assert!(err.to_string().starts_with("broker error"));
}
