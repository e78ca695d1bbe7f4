//! # Configuration Module
//!
//! This module holds the settings for the fetch pipeline and the way they are loaded.
//!
//! ## Key Features
//! - Environment-sourced settings (the primary source in deployments)
//! - Optional YAML file layer, with environment variables applied on top
//! - Human-readable durations (`"10s"`, `"250ms"`) via `humantime`
//! - Validation with field-level error messages
//!
//! ## Environment Variables
//! | Variable | Field |
//! |---|---|
//! | `POKEAPI_BASE_URL` | `base_url` |
//! | `REDIS_URL` | `cache_address` (presence selects the shared cache) |
//! | `CACHE_TTL` | `cache_ttl` (seconds, or a humantime duration) |
//! | `CACHE_KEY_PREFIX` | `cache_key_prefix` |
//! | `CACHE_MAX_ENTRIES` | `max_local_entries` |
//! | `POKEAPI_TIMEOUT` | `request_timeout` |
//! | `POKEAPI_MAX_RETRIES` | `retry.max_retries` |
//! | `POKEAPI_RETRY_BASE_DELAY` | `retry.base_delay` |
//! | `POKEAPI_RETRY_MAX_DELAY` | `retry.max_delay` |
//! | `LOG_LEVEL` | `logging.level` |
//! | `LOG_FORMAT` | `logging.format` |

use crate::core::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Public PokeAPI root
pub const DEFAULT_BASE_URL: &str = "https://pokeapi.co/api/v2";

/// Main configuration structure for the fetch pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Root for all constructed fetch paths
    pub base_url: String,

    /// Shared cache (Redis) address; absence selects the process-local cache
    pub cache_address: Option<String>,

    /// TTL applied to every cache write
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,

    /// Namespace prepended to every shared cache key
    pub cache_key_prefix: String,

    /// Capacity of the process-local cache
    pub max_local_entries: usize,

    /// Upper bound for a single shared cache round-trip
    #[serde(with = "humantime_serde")]
    pub cache_operation_timeout: Duration,

    /// Per-attempt upstream timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Upstream retry settings
    pub retry: RetryConfig,

    /// Logging settings
    pub logging: LogConfig,
}

/// Upstream retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Additional attempts after the first one
    pub max_retries: u32,

    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,

    /// Ceiling for any single delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Maximum random jitter as a fraction of the computed delay (0.0 - 1.0)
    pub jitter_ratio: f64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default verbosity when `RUST_LOG` is not set
    pub level: String,

    /// Output format
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            cache_address: None,
            cache_ttl: Duration::from_secs(3600),
            cache_key_prefix: "pokefetch:cache:".to_string(),
            max_local_entries: 10_000,
            cache_operation_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
            jitter_ratio: 0.1,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl FetchConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from defaults plus any key lookup
    ///
    /// Tests pass a closure over a map instead of touching the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        config.apply_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file, then apply environment overrides
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let mut config: FetchConfig = serde_yaml::from_str(&content)?;

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup to this configuration
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string());

        if let Some(url) = get("POKEAPI_BASE_URL") {
            self.base_url = url;
        }

        if let Some(address) = get("REDIS_URL") {
            // An empty value explicitly opts out of the shared cache
            self.cache_address = if address.is_empty() { None } else { Some(address) };
        }

        if let Some(ttl) = get("CACHE_TTL") {
            self.cache_ttl = parse_seconds_or_duration("CACHE_TTL", &ttl)?;
        }

        if let Some(prefix) = get("CACHE_KEY_PREFIX") {
            self.cache_key_prefix = prefix;
        }

        if let Some(max) = get("CACHE_MAX_ENTRIES") {
            self.max_local_entries = max
                .parse()
                .map_err(|e| ConfigError::invalid("CACHE_MAX_ENTRIES", format!("{}", e)))?;
        }

        if let Some(timeout) = get("POKEAPI_TIMEOUT") {
            self.request_timeout = parse_duration("POKEAPI_TIMEOUT", &timeout)?;
        }

        if let Some(retries) = get("POKEAPI_MAX_RETRIES") {
            self.retry.max_retries = retries
                .parse()
                .map_err(|e| ConfigError::invalid("POKEAPI_MAX_RETRIES", format!("{}", e)))?;
        }

        if let Some(delay) = get("POKEAPI_RETRY_BASE_DELAY") {
            self.retry.base_delay = parse_duration("POKEAPI_RETRY_BASE_DELAY", &delay)?;
        }

        if let Some(delay) = get("POKEAPI_RETRY_MAX_DELAY") {
            self.retry.max_delay = parse_duration("POKEAPI_RETRY_MAX_DELAY", &delay)?;
        }

        if let Some(level) = get("LOG_LEVEL") {
            self.logging.level = level.to_lowercase();
        }

        if let Some(format) = get("LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" | "pretty" => LogFormat::Text,
                other => {
                    return Err(ConfigError::invalid(
                        "LOG_FORMAT",
                        format!("unknown format '{}', expected 'text' or 'json'", other),
                    ))
                }
            };
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = Url::parse(&self.base_url)
            .map_err(|e| ConfigError::invalid("base_url", e.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ConfigError::invalid(
                "base_url",
                format!("unsupported scheme '{}'", base.scheme()),
            ));
        }

        if let Some(address) = &self.cache_address {
            Url::parse(address).map_err(|e| ConfigError::invalid("cache_address", e.to_string()))?;
        }

        if self.cache_ttl.is_zero() {
            return Err(ConfigError::invalid("cache_ttl", "must be greater than zero"));
        }

        if self.request_timeout.is_zero() {
            return Err(ConfigError::invalid("request_timeout", "must be greater than zero"));
        }

        if self.max_local_entries == 0 {
            return Err(ConfigError::invalid("max_local_entries", "must be greater than zero"));
        }

        if self.retry.max_delay < self.retry.base_delay {
            return Err(ConfigError::invalid(
                "retry.max_delay",
                "must not be smaller than retry.base_delay",
            ));
        }

        if !(0.0..=1.0).contains(&self.retry.jitter_ratio) {
            return Err(ConfigError::invalid("retry.jitter_ratio", "must be within 0.0..=1.0"));
        }

        Ok(())
    }

    /// Whether the shared cache variant is selected
    pub fn uses_shared_cache(&self) -> bool {
        self.cache_address.is_some()
    }
}

fn parse_duration(field: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value).map_err(|e| ConfigError::invalid(field, e.to_string()))
}

/// Plain integers are seconds; anything else goes through humantime
fn parse_seconds_or_duration(field: &str, value: &str) -> Result<Duration, ConfigError> {
    match value.parse::<u64>() {
        Ok(secs) => Ok(Duration::from_secs(secs)),
        Err(_) => parse_duration(field, value),
    }
}
