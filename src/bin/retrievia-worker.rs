//! Retrievia worker — task consumer entry point.
//!
//! ```text
//! retrievia-worker [-v...]               consume tasks until Ctrl-C / SIGTERM
//! retrievia-worker [-v...] call <task>   enqueue <task>, wait, print the result
//! ```

use std::time::Duration;

use serde_json::Map;
use tokio_util::sync::CancellationToken;
use tracing::info;

use retrievia::cli::CliArgs;
use retrievia::config::{self, Settings};
use retrievia::error::AppError;
use retrievia::logger::{self, LogOptions};
use retrievia::runtime::{spawn_components, spawn_signal_watcher};
use retrievia::worker::WorkerApp;
use retrievia::worker::protocol::TaskState;

const APP_NAME: &str = "retrievia-worker";
const CALL_TIMEOUT: Duration = Duration::from_secs(10);
const CALL_POLL: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let args = CliArgs::from_env();
    if args.help {
        print_usage();
        return Ok(());
    }

    let settings = config::get()?;
    logger::init(&LogOptions::from_settings(settings).with_level_override(args.log_level))?;

    match args.positional.as_slice() {
        [] => serve(settings).await,
        [cmd, task] if cmd == "call" => call(settings, task).await,
        other => Err(AppError::Config(format!(
            "unexpected arguments: {} (try --help)",
            other.join(" ")
        ))),
    }
}

async fn serve(settings: &Settings) -> Result<(), AppError> {
    let app = WorkerApp::new(APP_NAME, settings).await?;

    info!(
        app_env = %settings.app_env,
        concurrency = settings.worker.concurrency,
        visibility_timeout_secs = settings.worker.visibility_timeout_seconds,
        "worker starting"
    );

    let shutdown = CancellationToken::new();
    spawn_signal_watcher(shutdown.clone());
    spawn_components(app.components(), shutdown).join().await?;

    info!("worker stopped");
    Ok(())
}

async fn call(settings: &Settings, task: &str) -> Result<(), AppError> {
    let app = WorkerApp::new(APP_NAME, settings).await?;

    // An in-process broker is invisible to other processes; consume locally.
    let local = CancellationToken::new();
    let local_runtime = if app.broker().kind() == "memory" {
        info!("in-process broker, executing task locally");
        Some(spawn_components(app.components(), local.clone()))
    } else {
        None
    };

    let pending = app.send_task(task, Vec::new(), Map::new()).await?;
    let outcome = pending.wait(CALL_TIMEOUT, CALL_POLL).await;

    if let Some(rt) = local_runtime {
        local.cancel();
        rt.join().await?;
    }

    let result = outcome?;
    let rendered = serde_json::to_string_pretty(&result)
        .map_err(|e| AppError::Task(format!("render result: {e}")))?;
    println!("{rendered}");

    match result.state {
        TaskState::Success => Ok(()),
        state => Err(AppError::Task(format!(
            "task {task} finished with {state}: {}",
            result.error.as_deref().unwrap_or("no error recorded")
        ))),
    }
}

fn print_usage() {
    println!("Usage: {APP_NAME} [OPTIONS] [call <TASK>]");
    println!();
    println!("Commands:");
    println!("  call <TASK>                Enqueue TASK, wait up to 10s and print its result");
    println!();
    println!("Options:");
    println!("  -h, --help                 Print help");
    println!("  -v, -vv, -vvv, -vvvv       Increase logging verbosity");
}
