//! Resilience primitives for calls against an unreliable remote dependency
//!
//! - **[`circuit_breaker`]**: per-dependency failure tripwire with a
//!   time-boxed recovery trial
//! - **[`retry`]**: bounded exponential backoff around one attempt
//! - **[`executor`]**: breaker and retry composed into a single call site
//! - **[`rate_limiter`]**: per-identifier sliding-window admission control
//!
//! All time-dependent state reads a [`Clock`], so tests drive it with
//! [`MockClock`] instead of sleeping.
//!
//! ## Composition order
//!
//! [`ResilientExecutor`] places the breaker outside the retry loop. Once the
//! breaker opens, the next call fails fast and a retry loop in progress stops
//! after its current attempt. The reverse order would keep retrying against a
//! dependency the breaker already considers down.
//!
//! The rate limiter is independent of breaker state; callers consult it at
//! their admission boundary, usually before the cache:
//!
//! ```text
//! rate limit -> cache lookup -> (miss) executor -> breaker -> retry -> op
//! ```

pub mod circuit_breaker;
pub mod clock;
pub mod error;
pub mod executor;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerBuilderWithClock, CircuitBreakerConfig,
    CircuitBreakerConfigBuilder, CircuitBreakerMetrics, CircuitState,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use error::{ResilienceError, ResilienceResult};
pub use executor::ResilientExecutor;
pub use rate_limiter::{
    RateLimitExceeded, RateLimitStatus, RateLimiterConfig, RateLimiterConfigBuilder,
    SlidingWindowRateLimiter,
};
pub use retry::{
    policies, RetryConfig, RetryConfigBuilder, RetryDecision, RetryExecutor, RetryOutcome,
    RetryPolicy,
};
