//! Resilience and caching core for clients of rate-limited remote APIs.
//!
//! The crate wraps outbound calls in a circuit breaker and retry loop,
//! throttles callers with a per-identifier sliding window, caches idempotent
//! reads with TTLs that shrink under memory pressure, and reports the health
//! of all of the above.
//!
//! # Modules
//!
//! - [`resilience`]: circuit breaker, retry executor, resilient executor,
//!   sliding-window rate limiter and the [`Clock`](resilience::Clock) they
//!   share
//! - [`cache`]: memory-aware adaptive cache with prefix TTL rules
//! - [`memory`]: process memory sampling and pressure notifications
//! - [`health`]: health check registry and built-in checks
//! - [`lifecycle`]: cancellable background tasks behind every periodic job
//! - [`config`]: aggregate configuration loaded from TOML and environment
//! - [`error`]: error classification and shared error types
//! - `testing`: test doubles for code built on this crate (feature
//!   `test-utils`)
//!
//! # Quick start
//!
//! ```rust
//! use tokio_util::sync::CancellationToken;
//! use tollgate_common::error::RemoteError;
//! use tollgate_common::resilience::{CircuitBreakerConfig, ResilientExecutor, RetryConfig};
//!
//! # tokio_test::block_on(async {
//! let executor = ResilientExecutor::new(
//!     "projects-api",
//!     CircuitBreakerConfig::default(),
//!     RetryConfig::default(),
//! )
//! .unwrap();
//!
//! let projects = executor
//!     .execute("list_projects", &CancellationToken::new(), |_cancel| async {
//!         Ok::<_, RemoteError>(vec!["apollo".to_string()])
//!     })
//!     .await
//!     .unwrap();
//! assert_eq!(projects.len(), 1);
//! # });
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod cache;
pub mod config;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod memory;
pub mod resilience;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod utils;

// Re-export commonly used types and traits for convenience
pub use cache::{AdaptiveCache, AdaptiveCacheConfig, CacheStats, Cacheable, TtlRule};
pub use config::TollgateConfig;
pub use error::{ConfigError, ConfigResult, ErrorClassification, ErrorSeverity, RemoteError};
pub use health::{HealthCheck, HealthCheckRegistry, HealthReport, HealthStatus};
pub use lifecycle::{BackgroundTask, LifecycleError, LifecycleResult};
pub use memory::{MemoryPressureMonitor, MemoryPressureState};
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, Clock, MockClock, RateLimitExceeded,
    RateLimiterConfig, ResilienceError, ResilienceResult, ResilientExecutor, RetryConfig,
    RetryExecutor, RetryPolicy, SlidingWindowRateLimiter, SystemClock,
};
pub use utils::serde::duration_millis;
