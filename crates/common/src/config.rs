//! Aggregate configuration for every component in the crate
//!
//! Configuration is read from a TOML (or JSON) document, then individual
//! values can be overridden from environment variables. Durations are always
//! expressed in milliseconds.
//!
//! ## File format
//! ```toml
//! [circuit_breaker]
//! failure_threshold = 5
//! open_duration_ms = 60000
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 500
//!
//! [cache]
//! max_tracked_keys = 1000
//! ttl_rules = [{ prefix = "projects", ttl_ms = 3600000 }]
//! ```
//!
//! Missing sections and fields take their defaults.
//!
//! ## Environment Variables
//! - `TOLLGATE_BREAKER_FAILURE_THRESHOLD`
//! - `TOLLGATE_BREAKER_OPEN_DURATION_MS`
//! - `TOLLGATE_RETRY_MAX_ATTEMPTS`
//! - `TOLLGATE_RETRY_BASE_DELAY_MS`
//! - `TOLLGATE_RETRY_MAX_DELAY_MS`
//! - `TOLLGATE_RETRY_MULTIPLIER`
//! - `TOLLGATE_RATE_LIMIT_REQUESTS`
//! - `TOLLGATE_RATE_LIMIT_WINDOW_MS`
//! - `TOLLGATE_CACHE_MAX_KEYS`
//! - `TOLLGATE_CACHE_DEFAULT_TTL_MS`
//! - `TOLLGATE_CACHE_PRESSURE_TTL_FACTOR`
//! - `TOLLGATE_CACHE_SINGLE_FLIGHT` (true/false)
//! - `TOLLGATE_MEMORY_THRESHOLD_BYTES`
//! - `TOLLGATE_MEMORY_SAMPLE_INTERVAL_MS`
//! - `TOLLGATE_HEALTH_POLL_INTERVAL_MS`
//! - `TOLLGATE_HEALTH_CHECK_TIMEOUT_MS`

use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cache::AdaptiveCacheConfig;
use crate::error::{ConfigError, ConfigResult};
use crate::health::HealthRegistryConfig;
use crate::memory::MemoryMonitorConfig;
use crate::resilience::{CircuitBreakerConfig, RateLimiterConfig, RetryConfig};

/// Configuration for all components
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TollgateConfig {
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    pub rate_limiter: RateLimiterConfig,
    pub cache: AdaptiveCacheConfig,
    pub memory: MemoryMonitorConfig,
    pub health: HealthRegistryConfig,
}

impl TollgateConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(contents: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| ConfigError::Parse { message: format!("invalid TOML: {e}") })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(contents: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(contents)
            .map_err(|e| ConfigError::Parse { message: format!("invalid JSON: {e}") })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file; `.json` files are parsed as JSON, anything else as TOML
    pub fn from_toml_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration from file");

        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&contents),
            _ => Self::from_toml_str(&contents),
        }
    }

    /// Load `path` if given, then apply `TOLLGATE_*` environment overrides
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply overrides from the process environment
    ///
    /// Returns how many variables were applied.
    pub fn apply_env_overrides(&mut self) -> ConfigResult<usize> {
        self.apply_overrides_from(|var| std::env::var(var).ok())
    }

    /// Apply overrides from an arbitrary variable lookup, then re-validate
    ///
    /// A variable that is present but unparsable is an error rather than
    /// being ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> ConfigResult<usize>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut applied = 0;

        macro_rules! override_field {
            ($var:literal, $target:expr, $parse:ident) => {
                if let Some(raw) = lookup($var) {
                    $target = $parse($var, raw.trim())?;
                    debug!(var = $var, "configuration override applied");
                    applied += 1;
                }
            };
        }

        override_field!(
            "TOLLGATE_BREAKER_FAILURE_THRESHOLD",
            self.circuit_breaker.failure_threshold,
            parse_value
        );
        override_field!(
            "TOLLGATE_BREAKER_OPEN_DURATION_MS",
            self.circuit_breaker.open_duration,
            parse_millis
        );
        override_field!("TOLLGATE_RETRY_MAX_ATTEMPTS", self.retry.max_attempts, parse_value);
        override_field!("TOLLGATE_RETRY_BASE_DELAY_MS", self.retry.base_delay, parse_millis);
        override_field!("TOLLGATE_RETRY_MAX_DELAY_MS", self.retry.max_delay, parse_millis);
        override_field!("TOLLGATE_RETRY_MULTIPLIER", self.retry.multiplier, parse_value);
        override_field!(
            "TOLLGATE_RATE_LIMIT_REQUESTS",
            self.rate_limiter.requests_per_window,
            parse_value
        );
        override_field!("TOLLGATE_RATE_LIMIT_WINDOW_MS", self.rate_limiter.window, parse_millis);
        override_field!("TOLLGATE_CACHE_MAX_KEYS", self.cache.max_tracked_keys, parse_value);
        override_field!("TOLLGATE_CACHE_DEFAULT_TTL_MS", self.cache.default_ttl, parse_millis);
        override_field!(
            "TOLLGATE_CACHE_PRESSURE_TTL_FACTOR",
            self.cache.pressure_ttl_factor,
            parse_value
        );
        override_field!("TOLLGATE_CACHE_SINGLE_FLIGHT", self.cache.single_flight, parse_bool);
        override_field!("TOLLGATE_MEMORY_THRESHOLD_BYTES", self.memory.threshold_bytes, parse_value);
        override_field!(
            "TOLLGATE_MEMORY_SAMPLE_INTERVAL_MS",
            self.memory.sample_interval,
            parse_millis
        );
        override_field!("TOLLGATE_HEALTH_POLL_INTERVAL_MS", self.health.poll_interval, parse_millis);
        override_field!("TOLLGATE_HEALTH_CHECK_TIMEOUT_MS", self.health.check_timeout, parse_millis);

        if applied > 0 {
            info!(applied, "configuration overrides applied from environment");
        }
        self.validate()?;
        Ok(applied)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.circuit_breaker.validate()?;
        self.retry.validate()?;
        self.rate_limiter.validate()?;
        self.cache.validate()?;
        self.memory.validate()?;
        self.health.validate()
    }
}

fn parse_value<T>(var: &'static str, raw: &str) -> ConfigResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse().map_err(|e| ConfigError::invalid(var, format!("cannot parse `{raw}`: {e}")))
}

fn parse_millis(var: &'static str, raw: &str) -> ConfigResult<Duration> {
    parse_value::<u64>(var, raw).map(Duration::from_millis)
}

fn parse_bool(var: &'static str, raw: &str) -> ConfigResult<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(var, format!("expected a boolean, got `{raw}`"))),
    }
}
