//! Settings loading: environment collection, parsing and validation.
//!
//! Every known key is parsed; failures are collected so one startup attempt
//! reports all bad keys at once instead of one per restart.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::AppError;
use crate::logger;

use super::raw::{self, RawEnv};
use super::types::*;

/// Default location of the local override file.
pub const DEFAULT_ENV_FILE: &str = ".env";

/// Load settings from `env_file` (default `.env`) merged under the process
/// environment.
pub fn load(env_file: Option<&Path>) -> Result<Settings, AppError> {
    let path = env_file.unwrap_or(Path::new(DEFAULT_ENV_FILE));
    let env = RawEnv::collect(path)?;
    load_from(&env)
}

/// Parse and validate settings from an explicit variable map.
/// Tests build a [`RawEnv`] directly instead of mutating the process env.
pub fn load_from(env: &RawEnv) -> Result<Settings, AppError> {
    let mut f = Fields::new(env);

    let app_env = f.parse("APP_ENV", AppEnv::default());

    let log_level = f.string("LOG_LEVEL", raw::DEFAULT_LOG_LEVEL).to_ascii_lowercase();
    if let Err(e) = logger::parse_level(&log_level) {
        f.error("LOG_LEVEL", e.to_string());
    }

    let settings = Settings {
        app_name: f.string("APP_NAME", raw::DEFAULT_APP_NAME),
        app_env,
        api_host: f.string("API_HOST", raw::DEFAULT_API_HOST),
        api_port: f.parse("API_PORT", raw::DEFAULT_API_PORT),
        log: LogConfig {
            level: log_level,
            json: f.boolean("LOG_JSON", true),
            include_timestamp: f.boolean("LOG_INCLUDE_TIMESTAMP", true),
            file: f.optional_path("LOG_FILE"),
        },
        observability: ObservabilityConfig {
            metrics_enabled: f.boolean("METRICS_ENABLED", true),
            tracing_enabled: f.boolean("TRACING_ENABLED", false),
            otel_enabled: f.boolean("OTEL_ENABLED", false),
            otel_service_name: f.string("OTEL_SERVICE_NAME", raw::DEFAULT_OTEL_SERVICE_NAME),
            otel_exporter_otlp_endpoint: f
                .string("OTEL_EXPORTER_OTLP_ENDPOINT", raw::DEFAULT_OTEL_ENDPOINT),
            otel_traces_sampler: f.string("OTEL_TRACES_SAMPLER", raw::DEFAULT_OTEL_SAMPLER),
            otel_traces_sampler_arg: f
                .string("OTEL_TRACES_SAMPLER_ARG", raw::DEFAULT_OTEL_SAMPLER_ARG),
        },
        postgres: PostgresConfig {
            user: f.string("POSTGRES_USER", raw::DEFAULT_POSTGRES_USER),
            password: f.secret("POSTGRES_PASSWORD", raw::DEFAULT_POSTGRES_PASSWORD),
            db: f.string("POSTGRES_DB", raw::DEFAULT_POSTGRES_DB),
            host: f.string("POSTGRES_HOST", raw::DEFAULT_POSTGRES_HOST),
            port: f.parse("POSTGRES_PORT", raw::DEFAULT_POSTGRES_PORT),
            database_url: f.secret("DATABASE_URL", raw::DEFAULT_DATABASE_URL),
            async_database_url: f
                .secret("ASYNC_DATABASE_URL", raw::DEFAULT_ASYNC_DATABASE_URL),
            pool_size: f.parse("DB_POOL_SIZE", raw::DEFAULT_DB_POOL_SIZE),
            max_overflow: f.parse("DB_MAX_OVERFLOW", raw::DEFAULT_DB_MAX_OVERFLOW),
        },
        redis: RedisConfig {
            host: f.string("REDIS_HOST", raw::DEFAULT_REDIS_HOST),
            port: f.parse("REDIS_PORT", raw::DEFAULT_REDIS_PORT),
            url: f.string("REDIS_URL", raw::DEFAULT_REDIS_URL),
        },
        worker: WorkerConfig {
            broker_url: f.string("BROKER_URL", raw::DEFAULT_BROKER_URL),
            result_backend_url: f.string("RESULT_BACKEND_URL", raw::DEFAULT_RESULT_BACKEND_URL),
            concurrency: f.positive("WORKER_CONCURRENCY", raw::DEFAULT_WORKER_CONCURRENCY),
            connect_max_retries: f
                .parse("WORKER_CONNECT_MAX_RETRIES", raw::DEFAULT_WORKER_CONNECT_MAX_RETRIES),
            connect_retry_interval_seconds: f.parse(
                "WORKER_CONNECT_RETRY_INTERVAL_SECONDS",
                raw::DEFAULT_WORKER_CONNECT_RETRY_INTERVAL_SECONDS,
            ),
            poll_interval_ms: f
                .positive("WORKER_POLL_INTERVAL_MS", raw::DEFAULT_WORKER_POLL_INTERVAL_MS),
            visibility_timeout_seconds: f.positive(
                "WORKER_VISIBILITY_TIMEOUT_SECONDS",
                raw::DEFAULT_WORKER_VISIBILITY_TIMEOUT_SECONDS,
            ),
        },
        jwt: JwtConfig {
            secret_key: f.required_secret("JWT_SECRET_KEY"),
            algorithm: f.string("JWT_ALGORITHM", raw::DEFAULT_JWT_ALGORITHM),
            access_token_expire_minutes: f.parse(
                "JWT_ACCESS_TOKEN_EXPIRE_MINUTES",
                raw::DEFAULT_JWT_ACCESS_EXPIRE_MINUTES,
            ),
            refresh_token_expire_minutes: f.parse(
                "JWT_REFRESH_TOKEN_EXPIRE_MINUTES",
                raw::DEFAULT_JWT_REFRESH_EXPIRE_MINUTES,
            ),
            issuer: f.string("JWT_ISSUER", raw::DEFAULT_JWT_ISSUER),
            audience: f.string("JWT_AUDIENCE", raw::DEFAULT_JWT_AUDIENCE),
        },
        rate_limit: RateLimitConfig {
            enabled: f.boolean("RATE_LIMIT_ENABLED", true),
            requests: f.positive("RATE_LIMIT_REQUESTS", raw::DEFAULT_RATE_LIMIT_REQUESTS),
            window_seconds: f
                .positive("RATE_LIMIT_WINDOW_SECONDS", raw::DEFAULT_RATE_LIMIT_WINDOW_SECONDS),
        },
        request_max_body_bytes: f
            .positive("REQUEST_MAX_BODY_BYTES", raw::DEFAULT_REQUEST_MAX_BODY_BYTES),
        pinecone: PineconeConfig {
            api_key: f.secret("PINECONE_API_KEY", ""),
            index_name: f.string("PINECONE_INDEX_NAME", ""),
            cloud: f.string("PINECONE_CLOUD", raw::DEFAULT_PINECONE_CLOUD),
            region: f.string("PINECONE_REGION", raw::DEFAULT_PINECONE_REGION),
            namespace_prefix: f
                .string("PINECONE_NAMESPACE_PREFIX", raw::DEFAULT_PINECONE_NAMESPACE_PREFIX),
        },
        gemini: GeminiConfig {
            api_key: f.secret("GEMINI_API_KEY", ""),
            model: f.string("GEMINI_MODEL", raw::DEFAULT_GEMINI_MODEL),
            embedding_model: f
                .string("GEMINI_EMBEDDING_MODEL", raw::DEFAULT_GEMINI_EMBEDDING_MODEL),
            timeout_seconds: f
                .parse("GEMINI_TIMEOUT_SECONDS", raw::DEFAULT_GEMINI_TIMEOUT_SECONDS),
        },
    };

    if settings.is_production()
        && !settings.jwt.secret_key.is_empty()
        && settings.jwt.secret_key.expose().len() < raw::MIN_PRODUCTION_SECRET_BYTES
    {
        f.error(
            "JWT_SECRET_KEY",
            format!(
                "must be at least {} bytes in production",
                raw::MIN_PRODUCTION_SECRET_BYTES
            ),
        );
    }

    f.finish()?;
    Ok(settings)
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

/// Accepts `1/0`, `true/false`, `yes/no`, `on/off` in any case.
pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ── Field reader ─────────────────────────────────────────────────────────────

/// Typed reads over a [`RawEnv`] that record failures instead of returning
/// early. A failed read yields the default so construction can continue.
struct Fields<'a> {
    env: &'a RawEnv,
    errors: Vec<String>,
}

impl<'a> Fields<'a> {
    fn new(env: &'a RawEnv) -> Self {
        Self { env, errors: Vec::new() }
    }

    fn error(&mut self, key: &str, message: impl AsRef<str>) {
        self.errors.push(format!("{key}: {}", message.as_ref()));
    }

    fn string(&mut self, key: &str, default: &str) -> String {
        self.env.get(key).unwrap_or(default).to_string()
    }

    fn secret(&mut self, key: &str, default: &str) -> Secret {
        Secret::new(self.string(key, default))
    }

    fn required_secret(&mut self, key: &str) -> Secret {
        match self.env.get(key).map(str::trim) {
            Some(v) if !v.is_empty() => Secret::new(v),
            Some(_) => {
                self.error(key, "must not be empty");
                Secret::default()
            }
            None => {
                self.error(key, "required but not set");
                Secret::default()
            }
        }
    }

    fn optional_path(&mut self, key: &str) -> Option<PathBuf> {
        self.env
            .get(key)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(expand_home)
    }

    fn parse<T>(&mut self, key: &str, default: T) -> T
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let Some(raw) = self.env.get(key) else {
            return default;
        };
        match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(e) => {
                self.error(key, format!("invalid value '{raw}': {e}"));
                default
            }
        }
    }

    /// Like [`Fields::parse`] but rejects zero.
    fn positive<T>(&mut self, key: &str, default: T) -> T
    where
        T: FromStr + PartialEq + Default + Copy,
        T::Err: std::fmt::Display,
    {
        let v = self.parse(key, default);
        if v == T::default() {
            self.error(key, "must be greater than zero");
            return default;
        }
        v
    }

    fn boolean(&mut self, key: &str, default: bool) -> bool {
        let Some(raw) = self.env.get(key) else {
            return default;
        };
        parse_bool(raw).unwrap_or_else(|| {
            self.error(key, format!("invalid boolean '{raw}'"));
            default
        })
    }

    fn finish(self) -> Result<(), AppError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::Config(self.errors.join("; ")))
        }
    }
}
