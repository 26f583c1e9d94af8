//! Public configuration types.
//!
//! These are the resolved, ready-to-use structs the entry points consume.
//! Raw environment collection lives in `raw.rs`.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

// ── Secret ───────────────────────────────────────────────────────────────────

/// A credential value that never shows up in `Debug` or `Display` output.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the underlying value. Call sites should be rare and obvious.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("\"\"")
        } else {
            f.write_str("***")
        }
    }
}

// ── AppEnv ───────────────────────────────────────────────────────────────────

/// Deployment environment name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppEnv {
    #[default]
    Development,
    Staging,
    Production,
    Test,
}

impl AppEnv {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppEnv::Development => "development",
            AppEnv::Staging => "staging",
            AppEnv::Production => "production",
            AppEnv::Test => "test",
        }
    }
}

impl FromStr for AppEnv {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" => Ok(AppEnv::Development),
            "staging" => Ok(AppEnv::Staging),
            "production" => Ok(AppEnv::Production),
            "test" => Ok(AppEnv::Test),
            other => Err(format!(
                "expected one of development, staging, production, test; got '{other}'"
            )),
        }
    }
}

impl fmt::Display for AppEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Groups ───────────────────────────────────────────────────────────────────

/// Log output configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level filter string, already validated (`error` … `trace`).
    pub level: String,
    /// `true` = one JSON object per line; `false` = human-readable text.
    pub json: bool,
    pub include_timestamp: bool,
    /// Append log output to this file instead of stdout.
    pub file: Option<PathBuf>,
}

/// Observability toggles. Read and logged; no exporter is wired yet.
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,
    pub tracing_enabled: bool,
    pub otel_enabled: bool,
    pub otel_service_name: String,
    pub otel_exporter_otlp_endpoint: String,
    pub otel_traces_sampler: String,
    pub otel_traces_sampler_arg: String,
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub user: String,
    pub password: Secret,
    pub db: String,
    pub host: String,
    pub port: u16,
    pub database_url: Secret,
    pub async_database_url: Secret,
    pub pool_size: u32,
    pub max_overflow: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub url: String,
}

/// Task worker wiring: where tasks are dispatched and where results land.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub broker_url: String,
    pub result_backend_url: String,
    /// Number of concurrent consumers per worker process.
    pub concurrency: u32,
    /// Additional broker connection attempts after the first one fails.
    pub connect_max_retries: u32,
    pub connect_retry_interval_seconds: u64,
    /// Idle sleep between empty reserve attempts.
    pub poll_interval_ms: u64,
    /// Reserved-but-unacknowledged messages older than this are redelivered.
    pub visibility_timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret_key: Secret,
    pub algorithm: String,
    pub access_token_expire_minutes: u32,
    pub refresh_token_expire_minutes: u32,
    pub issuer: String,
    pub audience: String,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Requests allowed per client per window.
    pub requests: u32,
    pub window_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct PineconeConfig {
    pub api_key: Secret,
    pub index_name: String,
    pub cloud: String,
    pub region: String,
    pub namespace_prefix: String,
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Secret,
    pub model: String,
    pub embedding_model: String,
    pub timeout_seconds: u64,
}

// ── Settings ─────────────────────────────────────────────────────────────────

/// Fully-resolved process settings. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct Settings {
    pub app_name: String,
    pub app_env: AppEnv,
    pub api_host: String,
    pub api_port: u16,
    pub log: LogConfig,
    pub observability: ObservabilityConfig,
    pub postgres: PostgresConfig,
    pub redis: RedisConfig,
    pub worker: WorkerConfig,
    pub jwt: JwtConfig,
    pub rate_limit: RateLimitConfig,
    /// Largest accepted request body, in bytes.
    pub request_max_body_bytes: usize,
    pub pinecone: PineconeConfig,
    pub gemini: GeminiConfig,
}

impl Settings {
    /// `host:port` string suitable for `TcpListener::bind`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }

    pub fn is_production(&self) -> bool {
        self.app_env == AppEnv::Production
    }
}
