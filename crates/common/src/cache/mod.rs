//! Memory-aware adaptive caching for idempotent remote reads
//!
//! [`AdaptiveCache`] stores string-keyed values with:
//!
//! - **Prefix TTL classes**: `projects*` keys can live an hour while
//!   `workitems_*` keys expire in minutes ([`TtlPolicy`])
//! - **Pressure coupling**: while a [`MemoryPressureMonitor`] reports high
//!   pressure, new entries get a shortened TTL
//! - **Bounded key count**: reaching `max_tracked_keys` evicts the least
//!   recently accessed quarter synchronously inside `set`
//! - **Empty-value guard**: values with nothing to show are never stored
//!   ([`Cacheable::is_cacheable`])
//! - **Single-flight loading**: concurrent `get_or_set` misses on one key
//!   share a single factory call
//!
//! ```rust
//! use tollgate_common::cache::{AdaptiveCache, AdaptiveCacheConfig};
//!
//! let cache: AdaptiveCache<String> = AdaptiveCache::new(AdaptiveCacheConfig::default()).unwrap();
//! cache.set("projects:42", "Apollo".to_string());
//! assert_eq!(cache.get("projects:42").as_deref(), Some("Apollo"));
//!
//! // Empty results are not cached.
//! assert!(!cache.set("workitems_open", String::new()));
//! ```
//!
//! [`MemoryPressureMonitor`]: crate::memory::MemoryPressureMonitor

pub mod adaptive;
pub mod config;
pub mod size;
pub mod stats;
pub mod ttl;

pub use adaptive::AdaptiveCache;
pub use config::{AdaptiveCacheConfig, AdaptiveCacheConfigBuilder, TtlRule};
pub use size::Cacheable;
pub use stats::CacheStats;
pub use ttl::{TtlPolicy, MAX_ENTRY_TTL};
