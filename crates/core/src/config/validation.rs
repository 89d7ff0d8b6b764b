//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Longest response cache TTL accepted: ten years.
pub const MAX_RESPONSE_TTL_HOURS: u64 = 10 * 365 * 24;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - either cache ceiling is 0, or `max_file_bytes` exceeds `max_cache_bytes`
    /// - `response_ttl_hours` is 0 or above [`MAX_RESPONSE_TTL_HOURS`]
    /// - a timeout is 0, or the probe timeout is not shorter than the fetch timeout
    /// - `user_agent` or `bind_addr` is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_cache_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "max_cache_bytes".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.max_file_bytes == 0 {
            return Err(ConfigError::Invalid { field: "max_file_bytes".into(), reason: "must be greater than 0".into() });
        }
        if self.max_file_bytes > self.max_cache_bytes {
            return Err(ConfigError::Invalid {
                field: "max_file_bytes".into(),
                reason: "must not exceed max_cache_bytes".into(),
            });
        }

        if self.response_ttl_hours == 0 {
            return Err(ConfigError::Invalid {
                field: "response_ttl_hours".into(),
                reason: "must be at least 1 hour".into(),
            });
        }
        if self.response_ttl_hours > MAX_RESPONSE_TTL_HOURS {
            return Err(ConfigError::Invalid {
                field: "response_ttl_hours".into(),
                reason: format!("must not exceed {MAX_RESPONSE_TTL_HOURS}"),
            });
        }

        for (field, value) in [
            ("probe_timeout_ms", self.probe_timeout_ms),
            ("fetch_timeout_ms", self.fetch_timeout_ms),
            ("passthrough_timeout_ms", self.passthrough_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid { field: field.into(), reason: "must be greater than 0".into() });
            }
        }
        if self.probe_timeout_ms >= self.fetch_timeout_ms {
            return Err(ConfigError::Invalid {
                field: "probe_timeout_ms".into(),
                reason: "must be shorter than fetch_timeout_ms".into(),
            });
        }

        if self.user_agent.is_empty() {
            return Err(ConfigError::Invalid { field: "user_agent".into(), reason: "must not be empty".into() });
        }
        if self.bind_addr.is_empty() {
            return Err(ConfigError::Invalid { field: "bind_addr".into(), reason: "must not be empty".into() });
        }

        if self.sweep_interval_secs == 0 {
            tracing::warn!("sweep_interval_secs is 0; expired response rows are only removed lazily");
        }

        Ok(())
    }
}
