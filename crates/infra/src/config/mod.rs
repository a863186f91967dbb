//! Application configuration loading.
//!
//! ## Loading strategy
//! 1. `.env` is applied if present (developer convenience).
//! 2. Environment variables are tried first.
//! 3. If the required variables are missing, TOML files are probed:
//!    `./tillsync.toml`, then `./config.toml`.
//!
//! ## Environment variables
//! - `TILLSYNC_DB_PATH`: SQLite database file path (required)
//! - `TILLSYNC_BASE_URL`: inventory backend base URL (required)
//! - `TILLSYNC_API_TOKEN`: bearer token, optional
//! - `TILLSYNC_DB_POOL_SIZE`, `TILLSYNC_HTTP_TIMEOUT_SECS`
//! - `TILLSYNC_RECONCILE_INTERVAL_SECS`, `TILLSYNC_DRAIN_FAN_OUT`
//! - `TILLSYNC_QUEUE_SOFT_CAPACITY`
//! - `TILLSYNC_FAILURE_THRESHOLD`, `TILLSYNC_COOLDOWN_SECS`
//! - `TILLSYNC_RETRY_MAX_ATTEMPTS`

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use tillsync_domain::constants::{
    DEFAULT_BREAKER_COOLDOWN, DEFAULT_DRAIN_FAN_OUT, DEFAULT_FAILURE_THRESHOLD,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_QUEUE_SOFT_CAPACITY, DEFAULT_RECONCILE_INTERVAL,
};
use tillsync_domain::{Result, TillsyncError};

const FILE_CANDIDATES: [&str; 2] = ["tillsync.toml", "config.toml"];

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncSettings {
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
    #[serde(default = "default_drain_fan_out")]
    pub drain_fan_out: usize,
    #[serde(default = "default_queue_soft_capacity")]
    pub queue_soft_capacity: usize,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: default_reconcile_interval_secs(),
            drain_fan_out: default_drain_fan_out(),
            queue_soft_capacity: default_queue_soft_capacity(),
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
            retry_max_attempts: default_retry_max_attempts(),
        }
    }
}

/// Full application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub backend: BackendConfig,
    #[serde(default)]
    pub sync: SyncSettings,
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if self.backend.base_url.trim().is_empty() {
            return Err(TillsyncError::Config("backend.base_url must not be empty".into()));
        }
        if self.database.pool_size == 0 {
            return Err(TillsyncError::Config("database.pool_size must be at least 1".into()));
        }
        if self.sync.failure_threshold == 0 {
            return Err(TillsyncError::Config("sync.failure_threshold must be at least 1".into()));
        }
        if self.sync.retry_max_attempts == 0 {
            return Err(TillsyncError::Config("sync.retry_max_attempts must be at least 1".into()));
        }
        if self.sync.drain_fan_out == 0 {
            return Err(TillsyncError::Config("sync.drain_fan_out must be at least 1".into()));
        }
        Ok(())
    }
}

/// Load configuration from the environment, falling back to a TOML file.
pub fn load() -> Result<AppConfig> {
    let _ = dotenvy::dotenv();

    match load_from_env() {
        Ok(config) => {
            info!("configuration loaded from environment variables");
            Ok(config)
        }
        Err(err) => {
            debug!(error = %err, "environment incomplete; probing config files");
            load_from_file(None)
        }
    }
}

/// Load configuration from environment variables alone.
pub fn load_from_env() -> Result<AppConfig> {
    let config = AppConfig {
        database: DatabaseConfig {
            path: PathBuf::from(required_var("TILLSYNC_DB_PATH")?),
            pool_size: parsed_var("TILLSYNC_DB_POOL_SIZE", default_pool_size())?,
        },
        backend: BackendConfig {
            base_url: required_var("TILLSYNC_BASE_URL")?,
            api_token: std::env::var("TILLSYNC_API_TOKEN").ok(),
            timeout_secs: parsed_var("TILLSYNC_HTTP_TIMEOUT_SECS", default_http_timeout_secs())?,
        },
        sync: SyncSettings {
            reconcile_interval_secs: parsed_var(
                "TILLSYNC_RECONCILE_INTERVAL_SECS",
                default_reconcile_interval_secs(),
            )?,
            drain_fan_out: parsed_var("TILLSYNC_DRAIN_FAN_OUT", default_drain_fan_out())?,
            queue_soft_capacity: parsed_var(
                "TILLSYNC_QUEUE_SOFT_CAPACITY",
                default_queue_soft_capacity(),
            )?,
            failure_threshold: parsed_var(
                "TILLSYNC_FAILURE_THRESHOLD",
                default_failure_threshold(),
            )?,
            cooldown_secs: parsed_var("TILLSYNC_COOLDOWN_SECS", default_cooldown_secs())?,
            retry_max_attempts: parsed_var(
                "TILLSYNC_RETRY_MAX_ATTEMPTS",
                default_retry_max_attempts(),
            )?,
        },
    };
    config.validate()?;
    Ok(config)
}

/// Load configuration from an explicit path, or probe the default candidates.
pub fn load_from_file(path: Option<&Path>) -> Result<AppConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => FILE_CANDIDATES
            .iter()
            .map(PathBuf::from)
            .find(|candidate| candidate.exists())
            .ok_or_else(|| {
                TillsyncError::Config(format!(
                    "no configuration found: set TILLSYNC_* variables or provide one of {}",
                    FILE_CANDIDATES.join(", ")
                ))
            })?,
    };

    let raw = std::fs::read_to_string(&path).map_err(|err| {
        TillsyncError::Config(format!("cannot read {}: {err}", path.display()))
    })?;
    let config = parse_toml(&raw)?;
    info!(path = %path.display(), "configuration loaded from file");
    Ok(config)
}

fn parse_toml(raw: &str) -> Result<AppConfig> {
    let config: AppConfig = toml::from_str(raw)
        .map_err(|err| TillsyncError::Config(format!("invalid TOML configuration: {err}")))?;
    config.validate()?;
    Ok(config)
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| TillsyncError::Config(format!("missing environment variable {name}")))
}

fn parsed_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| TillsyncError::Config(format!("invalid value for {name}: {err}"))),
        Err(_) => Ok(default),
    }
}

fn default_pool_size() -> u32 {
    4
}

fn default_http_timeout_secs() -> u64 {
    10
}

fn default_reconcile_interval_secs() -> u64 {
    DEFAULT_RECONCILE_INTERVAL.as_secs()
}

fn default_drain_fan_out() -> usize {
    DEFAULT_DRAIN_FAN_OUT
}

fn default_queue_soft_capacity() -> usize {
    DEFAULT_QUEUE_SOFT_CAPACITY
}

fn default_failure_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}

fn default_cooldown_secs() -> u64 {
    DEFAULT_BREAKER_COOLDOWN.as_secs()
}

fn default_retry_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
