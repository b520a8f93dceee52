//! Configuration management for Turnstile.
//!
//! Settings are read once at startup and handed to constructors as plain values.
//! Sources are merged lowest to highest priority: built-in defaults, an optional
//! YAML file, `TURNSTILE__SECTION__FIELD` environment variables, and finally the
//! flat variables understood by earlier deployments (`RATE_LIMIT_IP`,
//! `RATE_LIMIT_TOKEN`, `BLOCK_DURATION`, `REDIS_HOST`, `REDIS_PORT`).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use axum::http::HeaderName;
use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TurnstileError};

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Header carrying the caller's API token
    #[serde(default = "default_token_header")]
    pub token_header: String,

    /// Honour `X-Forwarded-For` / `X-Real-IP`.
    ///
    /// These headers are supplied by the client and are only trustworthy when
    /// every request arrives through a proxy that overwrites them.
    #[serde(default = "default_trust_proxy_headers")]
    pub trust_proxy_headers: bool,

    /// What the interceptor does when the counter store fails
    #[serde(default)]
    pub failure_mode: FailureMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            token_header: default_token_header(),
            trust_proxy_headers: default_trust_proxy_headers(),
            failure_mode: FailureMode::default(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_token_header() -> String {
    "API_KEY".to_string()
}

fn default_trust_proxy_headers() -> bool {
    true
}

/// Policy applied when a rate decision cannot be made.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    /// Reject the request with an internal error
    #[default]
    Closed,
    /// Let the request through unthrottled
    Open,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Requests allowed per window for callers identified by IP
    #[serde(default = "default_limit_by_ip")]
    pub limit_by_ip: u64,

    /// Requests allowed per window for callers presenting a token
    #[serde(default = "default_limit_by_token")]
    pub limit_by_token: u64,

    /// Window width and lockout length, in seconds
    #[serde(default = "default_block_duration")]
    pub block_duration_secs: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            limit_by_ip: default_limit_by_ip(),
            limit_by_token: default_limit_by_token(),
            block_duration_secs: default_block_duration(),
        }
    }
}

impl RateLimitingConfig {
    /// The configured block duration.
    pub fn block_duration(&self) -> Duration {
        Duration::from_secs(self.block_duration_secs)
    }
}

fn default_limit_by_ip() -> u64 {
    10
}

fn default_limit_by_token() -> u64 {
    100
}

fn default_block_duration() -> u64 {
    60
}

/// Which counter store implementation to run with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared counters in Redis
    #[default]
    Redis,
    /// Process-local counters
    Memory,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend selection
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Prefix applied to every counter key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Bound on a single store round trip, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// How often the in-memory store drops lapsed records, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
            timeout_ms: default_timeout_ms(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl StoreConfig {
    /// The configured store round-trip timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// The configured sweep interval for the in-memory store.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_key_prefix() -> String {
    "turnstile:".to_string()
}

fn default_timeout_ms() -> u64 {
    500
}

fn default_sweep_interval() -> u64 {
    60
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Output format for the tracing subscriber
    #[serde(default)]
    pub format: LogFormat,
}

impl TurnstileConfig {
    /// Load configuration from a YAML file, without consulting the environment.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: TurnstileConfig = serde_yaml::from_str(&contents)
            .map_err(|e| TurnstileError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file layered under the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_from(path, None)
    }

    /// Load configuration with an explicit environment instead of the process one.
    pub fn load_with_env(path: Option<&Path>, env: HashMap<String, String>) -> Result<Self> {
        Self::load_from(path, Some(env))
    }

    fn load_from(path: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("TURNSTILE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .source(env.clone()),
        );

        let lookup = |name: &str| match &env {
            Some(vars) => vars.get(name).cloned(),
            None => std::env::var(name).ok(),
        };
        builder = apply_legacy_env(builder, lookup)?;

        let config: TurnstileConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limiting.block_duration_secs == 0 {
            return Err(TurnstileError::InvalidConfiguration(
                "block_duration_secs must be greater than zero".to_string(),
            ));
        }

        if self.store.timeout_ms == 0 {
            return Err(TurnstileError::InvalidConfiguration(
                "store timeout_ms must be greater than zero".to_string(),
            ));
        }

        if self.store.backend == StoreBackend::Redis && self.store.redis_url.trim().is_empty() {
            return Err(TurnstileError::InvalidConfiguration(
                "redis_url is required for the redis backend".to_string(),
            ));
        }

        if self.store.backend == StoreBackend::Redis {
            redis::Client::open(self.store.redis_url.as_str()).map_err(|e| {
                TurnstileError::InvalidConfiguration(format!("redis_url: {}", e))
            })?;
        }

        if self.store.backend == StoreBackend::Memory && self.store.sweep_interval_secs == 0 {
            return Err(TurnstileError::InvalidConfiguration(
                "sweep_interval_secs must be greater than zero".to_string(),
            ));
        }

        HeaderName::from_bytes(self.server.token_header.as_bytes()).map_err(|_| {
            TurnstileError::InvalidConfiguration(format!(
                "token_header {:?} is not a valid header name",
                self.server.token_header
            ))
        })?;

        Ok(())
    }
}

/// Overlay the flat variable names used by earlier deployments.
fn apply_legacy_env<F>(
    mut builder: ConfigBuilder<DefaultState>,
    lookup: F,
) -> Result<ConfigBuilder<DefaultState>>
where
    F: Fn(&str) -> Option<String>,
{
    let numeric = [
        ("RATE_LIMIT_IP", "rate_limiting.limit_by_ip"),
        ("RATE_LIMIT_TOKEN", "rate_limiting.limit_by_token"),
        ("BLOCK_DURATION", "rate_limiting.block_duration_secs"),
    ];

    for (var, key) in numeric {
        if let Some(raw) = lookup(var).filter(|v| !v.trim().is_empty()) {
            let value = raw
                .trim()
                .parse::<i64>()
                .ok()
                .filter(|v| *v >= 0)
                .ok_or_else(|| {
                    TurnstileError::InvalidConfiguration(format!(
                        "{} must be a non-negative integer, got {:?}",
                        var, raw
                    ))
                })?;
            builder = builder.set_override(key, value)?;
        }
    }

    if let Some(host) = lookup("REDIS_HOST").filter(|v| !v.trim().is_empty()) {
        let port = lookup("REDIS_PORT")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "6379".to_string());
        builder = builder.set_override(
            "store.redis_url",
            format!("redis://{}:{}", host.trim(), port.trim()),
        )?;
    }

    Ok(builder)
}
