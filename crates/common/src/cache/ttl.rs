//! Key-prefix TTL resolution

use std::time::Duration;

use super::config::AdaptiveCacheConfig;

/// Longest TTL an entry can get; longer explicit or configured TTLs are capped
pub const MAX_ENTRY_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Resolves the TTL for a key from the prefix table
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    rules: Vec<(String, Duration)>,
    default_ttl: Duration,
    pressure_factor: f64,
}

impl TtlPolicy {
    pub fn from_config(config: &AdaptiveCacheConfig) -> Self {
        Self {
            rules: config
                .ttl_rules
                .iter()
                .map(|rule| (rule.normalized_prefix().to_owned(), rule.ttl))
                .collect(),
            default_ttl: config.default_ttl,
            pressure_factor: config.pressure_ttl_factor,
        }
    }

    /// TTL of the first rule whose prefix matches `key`, else the default
    pub fn resolve(&self, key: &str) -> Duration {
        self.rules
            .iter()
            .find(|(prefix, _)| key.starts_with(prefix.as_str()))
            .map_or(self.default_ttl, |(_, ttl)| *ttl)
    }

    /// TTL applied to a new entry
    ///
    /// An explicit TTL wins over the table. The chosen TTL is capped at
    /// [`MAX_ENTRY_TTL`], then scaled by the pressure factor under memory
    /// pressure.
    pub fn effective(&self, key: &str, explicit: Option<Duration>, under_pressure: bool) -> Duration {
        let ttl = explicit.unwrap_or_else(|| self.resolve(key)).min(MAX_ENTRY_TTL);
        if under_pressure {
            ttl.mul_f64(self.pressure_factor)
        } else {
            ttl
        }
    }
}
