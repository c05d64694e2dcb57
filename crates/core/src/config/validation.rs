//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms < 100 {
            return Err(invalid("timeout_ms", "must be at least 100ms"));
        }
        if self.timeout_ms > 300_000 {
            return Err(invalid("timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }
        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }
        if self.endpoint_url.trim().is_empty() {
            return Err(invalid("endpoint_url", "must not be empty"));
        }

        let cache = &self.cache;
        if cache.ceiling == 0 {
            return Err(invalid("cache.ceiling", "must be greater than 0"));
        }
        if !(cache.reclamation_threshold > 0.0 && cache.reclamation_threshold <= 1.0) {
            return Err(invalid("cache.reclamation_threshold", "must be in (0, 1]"));
        }
        if cache.reclamation_batch_size == 0 {
            return Err(invalid("cache.reclamation_batch_size", "must be greater than 0"));
        }

        let quota = &self.quota;
        if quota.per_minute == 0 {
            return Err(invalid("quota.per_minute", "must be greater than 0"));
        }
        if quota.per_day == 0 {
            return Err(invalid("quota.per_day", "must be greater than 0"));
        }
        if quota.per_minute > quota.per_day {
            return Err(invalid("quota.per_minute", "must not exceed quota.per_day"));
        }

        let queue = &self.queue;
        if queue.backoff_ms.is_empty() {
            return Err(invalid("queue.backoff_ms", "must contain at least one delay"));
        }
        if queue.log_capacity == 0 {
            return Err(invalid("queue.log_capacity", "must be greater than 0"));
        }
        if queue.max_retries > 10 {
            tracing::warn!(max_retries = queue.max_retries, "unusually high retry ceiling configured");
        }

        Ok(())
    }
}
