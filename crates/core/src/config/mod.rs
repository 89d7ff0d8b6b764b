//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (MEDIAGATE_*)
//! 2. TOML config file (if MEDIAGATE_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::{ConfigError, MAX_RESPONSE_TTL_HOURS};

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (MEDIAGATE_*)
/// 2. TOML config file (if MEDIAGATE_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite metadata store.
    ///
    /// Set via MEDIAGATE_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Directory holding cached media objects.
    ///
    /// Set via MEDIAGATE_DOWNLOADS_DIR environment variable.
    #[serde(default = "default_downloads_dir")]
    pub downloads_dir: PathBuf,

    /// Socket address the HTTP server binds to.
    ///
    /// Set via MEDIAGATE_BIND_ADDR environment variable.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Lifetime of response cache rows, in hours.
    ///
    /// Set via MEDIAGATE_RESPONSE_TTL_HOURS environment variable.
    #[serde(default = "default_response_ttl_hours")]
    pub response_ttl_hours: u64,

    /// Total object cache ceiling in bytes.
    ///
    /// Set via MEDIAGATE_MAX_CACHE_BYTES environment variable.
    #[serde(default = "default_max_cache_bytes")]
    pub max_cache_bytes: u64,

    /// Largest single object that is admitted into the cache.
    ///
    /// Set via MEDIAGATE_MAX_FILE_BYTES environment variable.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,

    /// Timeout for size probes (HEAD requests), in milliseconds.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Timeout for full object downloads, in milliseconds.
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    /// How long passthrough waits for upstream response headers, in milliseconds.
    #[serde(default = "default_passthrough_timeout_ms")]
    pub passthrough_timeout_ms: u64,

    /// Interval between expired response row sweeps, in seconds. Zero disables it.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// User-Agent sent to origins.
    ///
    /// Set via MEDIAGATE_USER_AGENT environment variable.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Optional Referer sent to origins; some CDNs reject requests without one.
    #[serde(default)]
    pub referer: Option<String>,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./cache.db")
}

fn default_downloads_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".into()
}

fn default_response_ttl_hours() -> u64 {
    24
}

fn default_max_cache_bytes() -> u64 {
    10 * GIB
}

fn default_max_file_bytes() -> u64 {
    50 * MIB
}

fn default_probe_timeout_ms() -> u64 {
    10_000
}

fn default_fetch_timeout_ms() -> u64 {
    60_000
}

fn default_passthrough_timeout_ms() -> u64 {
    30_000
}

fn default_sweep_interval_secs() -> u64 {
    3_600
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".into()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            downloads_dir: default_downloads_dir(),
            bind_addr: default_bind_addr(),
            response_ttl_hours: default_response_ttl_hours(),
            max_cache_bytes: default_max_cache_bytes(),
            max_file_bytes: default_max_file_bytes(),
            probe_timeout_ms: default_probe_timeout_ms(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            passthrough_timeout_ms: default_passthrough_timeout_ms(),
            sweep_interval_secs: default_sweep_interval_secs(),
            user_agent: default_user_agent(),
            referer: None,
        }
    }
}

impl AppConfig {
    pub fn response_ttl(&self) -> Duration {
        Duration::from_secs(self.response_ttl_hours.saturating_mul(60 * 60))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn passthrough_timeout(&self) -> Duration {
        Duration::from_millis(self.passthrough_timeout_ms)
    }

    /// Sweep interval, or `None` when periodic sweeping is disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `MEDIAGATE_`
    /// 2. TOML file from `MEDIAGATE_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file or environment cannot be parsed,
    /// or if validation fails after loading.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("MEDIAGATE_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("MEDIAGATE_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
