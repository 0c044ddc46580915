//! Built-in checks for the crate's own components

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::registry::{BoxError, HealthCheck};
use super::status::HealthStatus;
use crate::cache::{AdaptiveCache, Cacheable};
use crate::memory::MemoryPressureMonitor;
use crate::resilience::{CircuitBreaker, CircuitState, Clock, SlidingWindowRateLimiter};

/// Unhealthy while the breaker is open; half-open counts as healthy
#[derive(Debug, Clone)]
pub struct CircuitBreakerCheck<C: Clock> {
    breaker: CircuitBreaker<C>,
}

impl<C: Clock> CircuitBreakerCheck<C> {
    pub fn new(breaker: CircuitBreaker<C>) -> Self {
        Self { breaker }
    }
}

#[async_trait]
impl<C: Clock> HealthCheck for CircuitBreakerCheck<C> {
    async fn check(&self, _cancel: &CancellationToken) -> Result<HealthStatus, BoxError> {
        let metrics = self.breaker.metrics();
        let status = if metrics.state == CircuitState::Open {
            HealthStatus::unhealthy(format!("circuit `{}` is open", self.breaker.name()))
        } else {
            HealthStatus::healthy().with_description(format!("circuit is {}", metrics.state))
        };
        Ok(status
            .with_data("state", metrics.state)
            .with_data("consecutive_failures", metrics.consecutive_failures)
            .with_data("total_calls", metrics.total_calls)
            .with_data("rejected_calls", metrics.rejected_calls))
    }
}

/// Always healthy; reports cache statistics as data
#[derive(Debug, Clone)]
pub struct CacheCheck<V: Cacheable, C: Clock> {
    cache: AdaptiveCache<V, C>,
}

impl<V: Cacheable, C: Clock> CacheCheck<V, C> {
    pub fn new(cache: AdaptiveCache<V, C>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl<V: Cacheable, C: Clock> HealthCheck for CacheCheck<V, C> {
    async fn check(&self, _cancel: &CancellationToken) -> Result<HealthStatus, BoxError> {
        let stats = self.cache.stats();
        Ok(HealthStatus::healthy()
            .with_data("hit_rate", stats.hit_rate())
            .with_data("under_pressure", self.cache.is_under_pressure())
            .with_data("stats", stats))
    }
}

/// Always healthy; reports how many identifiers hold a window
#[derive(Debug, Clone)]
pub struct RateLimiterCheck<C: Clock> {
    limiter: SlidingWindowRateLimiter<C>,
}

impl<C: Clock> RateLimiterCheck<C> {
    pub fn new(limiter: SlidingWindowRateLimiter<C>) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl<C: Clock> HealthCheck for RateLimiterCheck<C> {
    async fn check(&self, _cancel: &CancellationToken) -> Result<HealthStatus, BoxError> {
        let config = self.limiter.config();
        Ok(HealthStatus::healthy()
            .with_data("active_windows", self.limiter.active_windows())
            .with_data("requests_per_window", config.requests_per_window)
            .with_data("window_ms", u64::try_from(config.window.as_millis()).unwrap_or(u64::MAX)))
    }
}

/// Unhealthy under high memory pressure
///
/// Reads the monitor's last published state rather than sampling.
#[derive(Debug, Clone)]
pub struct MemoryPressureCheck {
    monitor: MemoryPressureMonitor,
}

impl MemoryPressureCheck {
    pub fn new(monitor: MemoryPressureMonitor) -> Self {
        Self { monitor }
    }
}

#[async_trait]
impl HealthCheck for MemoryPressureCheck {
    async fn check(&self, _cancel: &CancellationToken) -> Result<HealthStatus, BoxError> {
        let state = self.monitor.state();
        let threshold = self.monitor.config().threshold_bytes;
        let status = if state.is_high {
            HealthStatus::unhealthy(format!(
                "memory usage {} bytes exceeds threshold {threshold}",
                state.sampled_bytes
            ))
        } else {
            HealthStatus::healthy()
        };
        Ok(status
            .with_data("sampled_bytes", self.monitor.last_sample())
            .with_data("threshold_bytes", threshold))
    }
}
