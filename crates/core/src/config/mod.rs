//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (RECALL_*, nested keys separated by `__`)
//! 2. TOML config file (if RECALL_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (RECALL_*)
/// 2. TOML config file (if RECALL_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to SQLite cache database.
    ///
    /// Set via RECALL_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// URL of the remote answer endpoint (receives a POST per question).
    ///
    /// Set via RECALL_ENDPOINT_URL environment variable.
    #[serde(default = "default_endpoint_url")]
    pub endpoint_url: String,

    /// API key sent to the answer endpoint.
    ///
    /// Set via RECALL_API_KEY environment variable.
    #[serde(default)]
    pub api_key: Option<String>,

    /// User-Agent string for HTTP requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Endpoint call timeout in milliseconds.
    ///
    /// Set via RECALL_TIMEOUT_MS environment variable.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub quota: QuotaConfig,

    #[serde(default)]
    pub queue: QueueConfig,
}

/// Capacity and reclamation settings for the answer cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of stored entries.
    #[serde(default = "default_ceiling")]
    pub ceiling: u64,

    /// Fraction of `ceiling` at which reclamation runs before a write.
    #[serde(default = "default_reclamation_threshold")]
    pub reclamation_threshold: f64,

    /// Maximum entries deleted per reclamation pass.
    #[serde(default = "default_reclamation_batch_size")]
    pub reclamation_batch_size: u64,

    /// Entries not read for this many days are eligible for reclamation.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

/// Ceilings enforced by the quota limiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "default_per_minute")]
    pub per_minute: u32,

    #[serde(default = "default_per_day")]
    pub per_day: u32,

    /// Minimum spacing between two dispatched calls.
    #[serde(default = "default_min_spacing_ms")]
    pub min_spacing_ms: u64,
}

/// Retry and logging settings for the delivery queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before each retry; the last value doubles once the schedule runs out.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: Vec<u64>,

    /// Number of settled requests kept in the status log.
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,

    /// Route cache misses through the queue instead of calling the endpoint directly.
    #[serde(default = "default_true")]
    pub use_queue: bool,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./recall-cache.sqlite")
}

fn default_endpoint_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent".into()
}

fn default_user_agent() -> String {
    "recall/0.1".into()
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_ceiling() -> u64 {
    10_000
}

fn default_reclamation_threshold() -> f64 {
    0.9
}

fn default_reclamation_batch_size() -> u64 {
    1_000
}

fn default_retention_days() -> u32 {
    30
}

fn default_per_minute() -> u32 {
    15
}

fn default_per_day() -> u32 {
    1_500
}

fn default_min_spacing_ms() -> u64 {
    500
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff_ms() -> Vec<u64> {
    vec![1_000, 2_000]
}

fn default_log_capacity() -> usize {
    100
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            endpoint_url: default_endpoint_url(),
            api_key: None,
            user_agent: default_user_agent(),
            timeout_ms: default_timeout_ms(),
            cache: CacheConfig::default(),
            quota: QuotaConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ceiling: default_ceiling(),
            reclamation_threshold: default_reclamation_threshold(),
            reclamation_batch_size: default_reclamation_batch_size(),
            retention_days: default_retention_days(),
        }
    }
}

impl CacheConfig {
    /// Entry count that triggers reclamation (`ceiling × threshold`, rounded up).
    pub fn reclaim_at(&self) -> u64 {
        (self.ceiling as f64 * self.reclamation_threshold).ceil() as u64
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self { per_minute: default_per_minute(), per_day: default_per_day(), min_spacing_ms: default_min_spacing_ms() }
    }
}

impl QuotaConfig {
    pub fn min_spacing(&self) -> Duration {
        Duration::from_millis(self.min_spacing_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            log_capacity: default_log_capacity(),
            use_queue: true,
        }
    }
}

impl QueueConfig {
    /// Delay before retry number `retry` (zero-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let idx = retry as usize;
        let ms = match self.backoff_ms.get(idx) {
            Some(ms) => *ms,
            None => {
                let last = self.backoff_ms.last().copied().unwrap_or(1_000);
                let extra = (idx + 1).saturating_sub(self.backoff_ms.len()) as u32;
                last.saturating_mul(2u64.saturating_pow(extra))
            }
        };
        Duration::from_millis(ms)
    }
}

impl AppConfig {
    /// Timeout as Duration for use with reqwest/tokio.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `RECALL_`
    /// 2. TOML file from `RECALL_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a source cannot be read or parsed, or if
    /// validation fails after loading.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("RECALL_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("RECALL_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Fetch the API key, failing when it is required but unset.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the API key is not set.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ConfigError::Missing {
                field: "api_key".into(),
                hint: "Set RECALL_API_KEY environment variable".into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.db_path, PathBuf::from("./recall-cache.sqlite"));
        assert_eq!(config.timeout_ms, 5_000);
        assert_eq!(config.cache.ceiling, 10_000);
        assert_eq!(config.cache.reclamation_threshold, 0.9);
        assert_eq!(config.cache.reclamation_batch_size, 1_000);
        assert_eq!(config.cache.retention_days, 30);
        assert_eq!(config.quota, QuotaConfig { per_minute: 15, per_day: 1_500, min_spacing_ms: 500 });
        assert_eq!(config.queue.max_retries, 2);
        assert_eq!(config.queue.backoff_ms, vec![1_000, 2_000]);
        assert_eq!(config.queue.log_capacity, 100);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_timeout_duration() {
        let config = AppConfig::default();
        assert_eq!(config.timeout(), Duration::from_millis(5_000));
    }

    #[test]
    fn test_reclaim_at_rounds_up() {
        assert_eq!(CacheConfig::default().reclaim_at(), 9_000);
        let small = CacheConfig { ceiling: 7, reclamation_threshold: 0.9, ..Default::default() };
        assert_eq!(small.reclaim_at(), 7);
    }

    #[test]
    fn test_backoff_schedule_then_doubling() {
        let queue = QueueConfig::default();
        assert_eq!(queue.backoff(0), Duration::from_millis(1_000));
        assert_eq!(queue.backoff(1), Duration::from_millis(2_000));
        assert_eq!(queue.backoff(2), Duration::from_millis(4_000));
        assert_eq!(queue.backoff(3), Duration::from_millis(8_000));
    }

    #[test]
    fn test_require_api_key() {
        let config = AppConfig::default();
        assert!(matches!(config.require_api_key(), Err(ConfigError::Missing { .. })));

        let config = AppConfig { api_key: Some("test-key".into()), ..Default::default() };
        assert_eq!(config.require_api_key().unwrap(), "test-key");
    }

    #[test]
    fn test_load_layers_file_and_env() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "recall.toml",
                r#"
                timeout_ms = 8000

                [quota]
                per_minute = 30

                [queue]
                backoff_ms = [250, 500, 750]
                "#,
            )?;
            jail.set_env("RECALL_CONFIG_FILE", "recall.toml");
            jail.set_env("RECALL_QUOTA__PER_DAY", "3000");
            jail.set_env("RECALL_API_KEY", "from-env");

            let config = AppConfig::load().expect("config loads");
            assert_eq!(config.timeout_ms, 8_000);
            assert_eq!(config.quota.per_minute, 30);
            assert_eq!(config.quota.per_day, 3_000);
            assert_eq!(config.quota.min_spacing_ms, 500);
            assert_eq!(config.queue.backoff_ms, vec![250, 500, 750]);
            assert_eq!(config.api_key.as_deref(), Some("from-env"));
            Ok(())
        });
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("RECALL_CACHE__CEILING", "0");
            assert!(matches!(AppConfig::load(), Err(ConfigError::Invalid { field, .. }) if field == "cache.ceiling"));
            Ok(())
        });
    }
}
