//! Logging initialisation via tracing-subscriber.
//!
//! Call [`init`] once at startup, after settings are resolved. Output is
//! either one JSON object per line or the human-readable formatter, with or
//! without timestamps, written to stdout or an append-mode file.

use std::path::PathBuf;

use tracing::Subscriber;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::config::Settings;
use crate::error::AppError;

/// Everything the subscriber needs, decoupled from [`Settings`] so entry
/// points can override the level from the command line.
#[derive(Debug, Clone)]
pub struct LogOptions {
    pub level: String,
    /// `true` = JSON records; `false` = human-readable text.
    pub json: bool,
    pub include_timestamp: bool,
    pub file: Option<PathBuf>,
}

impl LogOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            level: settings.log.level.clone(),
            json: settings.log.json,
            include_timestamp: settings.log.include_timestamp,
            file: settings.log.file.clone(),
        }
    }

    /// Replace the configured level with a command-line override.
    pub fn with_level_override(mut self, level: Option<&str>) -> Self {
        if let Some(level) = level {
            self.level = level.to_string();
        }
        self
    }
}

/// Initialise the global tracing subscriber.
///
/// Fails if a global subscriber is already installed; there is no runtime
/// reconfiguration.
pub fn init(opts: &LogOptions) -> Result<(), AppError> {
    let writer = match &opts.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    AppError::Logger(format!(
                        "failed to open log file '{}': {e}",
                        path.display()
                    ))
                })?;
            BoxMakeWriter::new(file)
        }
        None => BoxMakeWriter::new(std::io::stdout),
    };

    let subscriber = build_subscriber(opts, writer)?;
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AppError::Logger(format!("failed to set subscriber: {e}")))?;

    Ok(())
}

/// Build the subscriber without installing it.
pub fn build_subscriber(
    opts: &LogOptions,
    writer: BoxMakeWriter,
) -> Result<Box<dyn Subscriber + Send + Sync>, AppError> {
    let filter = build_filter(&opts.level)?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false);

    let subscriber: Box<dyn Subscriber + Send + Sync> = match (opts.json, opts.include_timestamp) {
        (true, true) => Box::new(builder.json().flatten_event(true).finish()),
        (true, false) => Box::new(builder.json().flatten_event(true).without_time().finish()),
        (false, true) => Box::new(builder.finish()),
        (false, false) => Box::new(builder.without_time().finish()),
    };

    Ok(subscriber)
}

/// The level is the whole filter; `RUST_LOG` is not consulted. Settings
/// reject bad levels at load time, so an error here means the caller built
/// `LogOptions` by hand.
fn build_filter(level: &str) -> Result<EnvFilter, AppError> {
    parse_level(level)?;
    EnvFilter::try_new(level)
        .map_err(|e| AppError::Logger(format!("invalid log level '{level}': {e}")))
}

/// Parse a log level string into a [`LevelFilter`], returning an error on
/// unrecognised values. Used to validate settings before initialising.
pub fn parse_level(level: &str) -> Result<LevelFilter, AppError> {
    if level.is_empty() {
        return Err(AppError::Logger("log level must not be empty".into()));
    }
    level
        .parse::<LevelFilter>()
        .map_err(|_| AppError::Logger(format!("unrecognised log level: '{level}'")))
}
