//! Retrievia API — HTTP entry point.
//!
//! Startup sequence:
//!   1. Parse `-v` flags
//!   2. Load settings (`.env` + environment)
//!   3. Init logger once (CLI verbosity > LOG_LEVEL)
//!   4. Spawn Ctrl-C / SIGTERM → shutdown watcher
//!   5. Run the HTTP component until shutdown

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use retrievia::cli::CliArgs;
use retrievia::config;
use retrievia::error::AppError;
use retrievia::http::ApiServer;
use retrievia::logger::{self, LogOptions};
use retrievia::runtime::{Component, spawn_components, spawn_signal_watcher};

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

    info!(
        app_name = %settings.app_name,
        app_env = %settings.app_env,
        configured_log_level = %settings.log.level,
        effective_log_level = args.log_level.unwrap_or(settings.log.level.as_str()),
        bind_addr = %settings.bind_addr(),
        "config loaded"
    );

    let shutdown = CancellationToken::new();
    spawn_signal_watcher(shutdown.clone());

    let components: Vec<Box<dyn Component>> =
        vec![Box::new(ApiServer::new(Arc::new(settings.clone())))];
    spawn_components(components, shutdown).join().await
}

fn print_usage() {
    println!("Usage: retrievia-api [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -h, --help                 Print help");
    println!("  -v, -vv, -vvv, -vvvv       Increase logging verbosity");
    println!();
    println!("Settings are read from the environment and ./.env");
}
