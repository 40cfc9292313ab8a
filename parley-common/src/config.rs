//! Configuration management for Parley services.
//!
//! Configuration lives at `~/.parley/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (PARLEY_* prefix, plus `REDIS_URL`)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `PARLEY_BACKEND` → backend ("memory" | "redis")
//! - `REDIS_URL` / `PARLEY_REDIS_URL` → redis.url
//! - `PARLEY_SESSION_TTL_SECS` → session_ttl_secs
//! - `PARLEY_REPLY_TIMEOUT_SECS` → reply_timeout_secs
//! - `PARLEY_SWEEP_INTERVAL_SECS` → sweep_interval_secs
//! - `PARLEY_LOG_LEVEL` → observability.log_level
//! - `PARLEY_LOG_FORMAT` → observability.log_format

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".parley"),
        |dirs| dirs.home_dir().join(".parley"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Storage backend for session records.
///
/// Exactly one backend is active per deployment; selection happens once
/// at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process volatile map (single process, lost on restart).
    #[default]
    Memory,
    /// External Redis store with native per-key TTL.
    Redis,
}

/// Redis connection configuration for the external session backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL (redis://host:port).
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Key prefix for namespacing conversation keys.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".into()
}

fn default_key_prefix() -> String {
    "conversation:".into()
}

fn default_connect_timeout_secs() -> u64 {
    5
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Base log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Output format: "json" or "pretty".
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

/// Top-level configuration for the Parley conversation backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Which session storage backend to construct.
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection settings (used when `backend` is `redis`).
    #[serde(default)]
    pub redis: RedisConfig,

    /// How long the coordinator waits on a worker completion signal.
    #[serde(default = "default_reply_timeout_secs")]
    pub reply_timeout_secs: u64,

    /// Interval between expiry sweep cycles.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Idle threshold after which a conversation is reclaimed. Also the
    /// native per-key TTL on the Redis backend.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    /// Logging settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

fn default_reply_timeout_secs() -> u64 {
    60
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

fn default_session_ttl_secs() -> u64 {
    7200
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis: RedisConfig::default(),
            reply_timeout_secs: default_reply_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            session_ttl_secs: default_session_ttl_secs(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default path with environment overrides.
    pub fn load() -> Self {
        Self::load_from(&config_path())
    }

    /// Load configuration from a specific file with environment overrides.
    ///
    /// A missing or unparseable file degrades to defaults (with a warning),
    /// never to a startup failure.
    pub fn load_from(path: &Path) -> Self {
        let mut config = match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Unparseable config file, using defaults");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        };
        config.apply_env();
        config
    }

    /// Apply environment-variable overrides.
    fn apply_env(&mut self) {
        if let Ok(backend) = std::env::var("PARLEY_BACKEND") {
            match backend.to_lowercase().as_str() {
                "memory" => self.backend = StoreBackend::Memory,
                "redis" => self.backend = StoreBackend::Redis,
                other => {
                    tracing::warn!(backend = %other, "Unknown PARLEY_BACKEND value, keeping configured backend");
                }
            }
        }
        if let Ok(url) = std::env::var("PARLEY_REDIS_URL").or_else(|_| std::env::var("REDIS_URL")) {
            self.redis.url = url;
        }
        if let Some(secs) = env_u64("PARLEY_REPLY_TIMEOUT_SECS") {
            self.reply_timeout_secs = secs;
        }
        if let Some(secs) = env_u64("PARLEY_SWEEP_INTERVAL_SECS") {
            self.sweep_interval_secs = secs;
        }
        if let Some(secs) = env_u64("PARLEY_SESSION_TTL_SECS") {
            self.session_ttl_secs = secs;
        }
        if let Ok(level) = std::env::var("PARLEY_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Ok(format) = std::env::var("PARLEY_LOG_FORMAT") {
            self.observability.log_format = format;
        }
    }

    /// Coordinator wait deadline as a `Duration`.
    pub const fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.reply_timeout_secs)
    }

    /// Sweep interval as a `Duration`.
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Session idle threshold / Redis TTL as a `Duration`.
    pub const fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
