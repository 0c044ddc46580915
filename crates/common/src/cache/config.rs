//! Adaptive cache configuration
//!
//! TTLs are chosen per key through a prefix table, so call sites encode how
//! volatile a value is purely through key naming:
//!
//! ```rust
//! use std::time::Duration;
//!
//! use tollgate_common::cache::{AdaptiveCacheConfig, TtlRule};
//!
//! let config = AdaptiveCacheConfig::builder()
//!     .max_tracked_keys(500)
//!     .ttl_rule(TtlRule::new("projects", Duration::from_secs(3600)))
//!     .ttl_rule(TtlRule::new("workitems_*", Duration::from_secs(120)))
//!     .default_ttl(Duration::from_secs(300))
//!     .build()
//!     .unwrap();
//! assert_eq!(config.ttl_rules.len(), 2);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::utils::duration_millis;

/// Maps keys starting with `prefix` to a TTL
///
/// A trailing `*` in the prefix is accepted and ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlRule {
    pub prefix: String,
    #[serde(rename = "ttl_ms", with = "duration_millis")]
    pub ttl: Duration,
}

impl TtlRule {
    pub fn new(prefix: impl Into<String>, ttl: Duration) -> Self {
        Self { prefix: prefix.into(), ttl }
    }

    /// Prefix with any trailing wildcard removed
    pub fn normalized_prefix(&self) -> &str {
        self.prefix.trim_end_matches('*')
    }
}

/// Configuration for [`AdaptiveCache`](super::AdaptiveCache)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveCacheConfig {
    /// Ceiling on tracked keys; reaching it triggers LRU eviction in `set`
    pub max_tracked_keys: usize,
    /// TTL for keys that match no rule
    #[serde(rename = "default_ttl_ms", with = "duration_millis")]
    pub default_ttl: Duration,
    /// Prefix rules, checked in order; the first match wins
    pub ttl_rules: Vec<TtlRule>,
    /// Multiplier applied to TTLs of entries set under high memory pressure
    pub pressure_ttl_factor: f64,
    /// Share of tracked keys evicted when the ceiling is reached
    pub eviction_fraction: f64,
    #[serde(rename = "expiration_sweep_interval_ms", with = "duration_millis")]
    pub expiration_sweep_interval: Duration,
    /// De-duplicate concurrent `get_or_set` misses on the same key
    pub single_flight: bool,
}

impl Default for AdaptiveCacheConfig {
    fn default() -> Self {
        Self {
            max_tracked_keys: 1000,
            default_ttl: Duration::from_secs(5 * 60),
            ttl_rules: vec![
                TtlRule::new("projects", Duration::from_secs(60 * 60)),
                TtlRule::new("teams", Duration::from_secs(60 * 60)),
                TtlRule::new("users", Duration::from_secs(30 * 60)),
                TtlRule::new("workitems_", Duration::from_secs(2 * 60)),
            ],
            pressure_ttl_factor: 0.5,
            eviction_fraction: 0.25,
            expiration_sweep_interval: Duration::from_secs(60),
            single_flight: true,
        }
    }
}

impl AdaptiveCacheConfig {
    pub fn builder() -> AdaptiveCacheConfigBuilder {
        AdaptiveCacheConfigBuilder::default()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_tracked_keys == 0 {
            return Err(ConfigError::invalid("max_tracked_keys", "must be greater than 0"));
        }
        if self.default_ttl.is_zero() {
            return Err(ConfigError::invalid("default_ttl", "must be greater than zero"));
        }
        for rule in &self.ttl_rules {
            if rule.normalized_prefix().is_empty() {
                return Err(ConfigError::invalid("ttl_rules", "prefix must not be empty"));
            }
            if rule.ttl.is_zero() {
                return Err(ConfigError::invalid(
                    "ttl_rules",
                    format!("ttl for prefix `{}` must be greater than zero", rule.prefix),
                ));
            }
        }
        if !(self.pressure_ttl_factor > 0.0 && self.pressure_ttl_factor <= 1.0) {
            return Err(ConfigError::invalid("pressure_ttl_factor", "must be in (0, 1]"));
        }
        if !(self.eviction_fraction > 0.0 && self.eviction_fraction <= 1.0) {
            return Err(ConfigError::invalid("eviction_fraction", "must be in (0, 1]"));
        }
        if self.expiration_sweep_interval.is_zero() {
            return Err(ConfigError::invalid(
                "expiration_sweep_interval",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Builder for [`AdaptiveCacheConfig`]
///
/// Rules added through [`ttl_rule`](Self::ttl_rule) replace the default table.
#[derive(Debug, Default)]
pub struct AdaptiveCacheConfigBuilder {
    config: AdaptiveCacheConfig,
    rules: Option<Vec<TtlRule>>,
}

impl AdaptiveCacheConfigBuilder {
    pub fn max_tracked_keys(mut self, max: usize) -> Self {
        self.config.max_tracked_keys = max;
        self
    }

    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.config.default_ttl = ttl;
        self
    }

    pub fn ttl_rule(mut self, rule: TtlRule) -> Self {
        self.rules.get_or_insert_with(Vec::new).push(rule);
        self
    }

    /// Drop the default prefix table so every key uses `default_ttl`
    pub fn no_ttl_rules(mut self) -> Self {
        self.rules = Some(Vec::new());
        self
    }

    pub fn pressure_ttl_factor(mut self, factor: f64) -> Self {
        self.config.pressure_ttl_factor = factor;
        self
    }

    pub fn eviction_fraction(mut self, fraction: f64) -> Self {
        self.config.eviction_fraction = fraction;
        self
    }

    pub fn expiration_sweep_interval(mut self, interval: Duration) -> Self {
        self.config.expiration_sweep_interval = interval;
        self
    }

    pub fn single_flight(mut self, enabled: bool) -> Self {
        self.config.single_flight = enabled;
        self
    }

    pub fn build(mut self) -> ConfigResult<AdaptiveCacheConfig> {
        if let Some(rules) = self.rules {
            self.config.ttl_rules = rules;
        }
        self.config.validate()?;
        Ok(self.config)
    }
}
