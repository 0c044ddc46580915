//! Per-dependency circuit breaker
//!
//! A breaker counts consecutive failures of calls against one remote
//! dependency. Once the count reaches `failure_threshold` it opens and
//! rejects calls without invoking them. After `open_duration` the next state
//! read moves it to half-open; the following call is a trial whose outcome
//! either closes the breaker or reopens it.
//!
//! There is no background timer: the open→half-open transition happens
//! lazily whenever the state is read.
//!
//! ```rust
//! use std::time::Duration;
//!
//! use tollgate_common::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
//!
//! let config = CircuitBreakerConfig::builder()
//!     .failure_threshold(3)
//!     .open_duration(Duration::from_secs(30))
//!     .build()
//!     .unwrap();
//! let breaker = CircuitBreaker::new("work-items-api", config).unwrap();
//! assert_eq!(breaker.state(), CircuitState::Closed);
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::error::{ResilienceError, ResilienceResult};
use crate::error::{ConfigError, ConfigResult};
use crate::utils::duration_millis;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow normally
    Closed,
    /// Calls are rejected without being attempted
    Open,
    /// The next call tests whether the dependency recovered
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the breaker opens
    pub failure_threshold: u32,
    /// How long the breaker stays open before allowing a trial call
    #[serde(rename = "open_duration_ms", with = "duration_millis")]
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, open_duration: Duration::from_secs(60) }
    }
}

impl CircuitBreakerConfig {
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold", "must be greater than 0"));
        }
        if self.open_duration.is_zero() {
            return Err(ConfigError::invalid("open_duration", "must be greater than zero"));
        }
        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`]
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn open_duration(mut self, duration: Duration) -> Self {
        self.config.open_duration = duration;
        self
    }

    /// Switch to building a breaker directly with a custom clock
    pub fn clock<C: Clock>(self, clock: C) -> CircuitBreakerBuilderWithClock<C> {
        CircuitBreakerBuilderWithClock { config: self.config, clock }
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Builder that produces a [`CircuitBreaker`] bound to a custom clock
pub struct CircuitBreakerBuilderWithClock<C: Clock> {
    config: CircuitBreakerConfig,
    clock: C,
}

impl<C: Clock> CircuitBreakerBuilderWithClock<C> {
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn open_duration(mut self, duration: Duration) -> Self {
        self.config.open_duration = duration;
        self
    }

    pub fn build(self, name: impl Into<String>) -> ConfigResult<CircuitBreaker<C>> {
        CircuitBreaker::with_clock(name, self.config, self.clock)
    }
}

/// Point-in-time view of a breaker for monitoring
#[derive(Debug, Clone)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub rejected_calls: u64,
    pub last_failure: Option<Instant>,
    pub opened_at: Option<Instant>,
    pub state_changed_at: Instant,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    last_failure: Option<Instant>,
    state_changed_at: Instant,
    total_calls: u64,
    total_failures: u64,
    rejected_calls: u64,
}

impl BreakerState {
    fn new(now: Instant) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            last_failure: None,
            state_changed_at: now,
            total_calls: 0,
            total_failures: 0,
            rejected_calls: 0,
        }
    }

    fn transition(&mut self, to: CircuitState, now: Instant) {
        self.state = to;
        self.state_changed_at = now;
        if to == CircuitState::Open {
            self.opened_at = Some(now);
        }
    }
}

/// Circuit breaker guarding one remote dependency
///
/// Cloning is cheap and clones share state, so the same breaker can be handed
/// to an executor and to a health check.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    name: Arc<str>,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<BreakerState>>,
    clock: Arc<C>,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            config: self.config.clone(),
            inner: Arc::clone(&self.inner),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl CircuitBreaker<SystemClock> {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(name, config, SystemClock)
    }

    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }
}

impl<C: Clock> CircuitBreaker<C> {
    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: C,
    ) -> ConfigResult<Self> {
        config.validate()?;
        let now = clock.now();
        Ok(Self {
            name: Arc::from(name.into()),
            config,
            inner: Arc::new(Mutex::new(BreakerState::new(now))),
            clock: Arc::new(clock),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state, applying the lazy open→half-open transition
    pub fn state(&self) -> CircuitState {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, now);
        inner.state
    }

    /// Run `operation` under breaker protection
    ///
    /// Rejects with [`ResilienceError::CircuitOpen`] while open. Every
    /// failure of the operation is recorded and propagated as
    /// [`ResilienceError::OperationFailed`].
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.try_acquire().map_err(|state| ResilienceError::CircuitOpen { state })?;

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => {
                self.record_failure();
                Err(ResilienceError::OperationFailed { source: error })
            }
        }
    }

    /// Like [`execute`](Self::execute) for operations that already produce
    /// resilience outcomes (the executor's retry loop)
    ///
    /// Cancellation and a breaker rejection observed mid-sequence are passed
    /// through without counting as a dependency failure.
    pub(crate) async fn execute_guarded<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ResilienceResult<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.try_acquire().map_err(|state| ResilienceError::CircuitOpen { state })?;

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error @ (ResilienceError::Cancelled | ResilienceError::CircuitOpen { .. })) => {
                Err(error)
            }
            Err(error) => {
                self.record_failure();
                Err(error)
            }
        }
    }

    /// Admission check; returns the rejecting state when open
    ///
    /// The lock is released before the caller runs its operation.
    pub fn try_acquire(&self) -> Result<(), CircuitState> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, now);

        if inner.state == CircuitState::Open {
            inner.rejected_calls += 1;
            debug!(breaker = %self.name, "circuit open, rejecting call");
            return Err(CircuitState::Open);
        }

        inner.total_calls += 1;
        Ok(())
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::HalfOpen => {
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.transition(CircuitState::Closed, now);
                info!(breaker = %self.name, "circuit closed after successful trial call");
            }
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::Open => {
                // A call admitted before the breaker opened finished late.
                debug!(breaker = %self.name, "success recorded while open, ignoring");
            }
        }
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.total_failures += 1;
        inner.last_failure = Some(now);

        match inner.state {
            CircuitState::HalfOpen => {
                inner.transition(CircuitState::Open, now);
                warn!(breaker = %self.name, "trial call failed, circuit reopened");
            }
            CircuitState::Closed if inner.consecutive_failures >= self.config.failure_threshold => {
                inner.transition(CircuitState::Open, now);
                warn!(
                    breaker = %self.name,
                    failures = inner.consecutive_failures,
                    open_for = ?self.config.open_duration,
                    "circuit opened"
                );
            }
            CircuitState::Closed | CircuitState::Open => {}
        }
    }

    /// Force the breaker back to closed with a zeroed failure count
    pub fn reset(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.transition(CircuitState::Closed, now);
        info!(breaker = %self.name, "circuit manually reset to closed");
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, now);
        CircuitBreakerMetrics {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            total_calls: inner.total_calls,
            total_failures: inner.total_failures,
            rejected_calls: inner.rejected_calls,
            last_failure: inner.last_failure,
            opened_at: inner.opened_at,
            state_changed_at: inner.state_changed_at,
        }
    }

    fn refresh(&self, inner: &mut BreakerState, now: Instant) {
        if inner.state != CircuitState::Open {
            return;
        }
        let Some(opened_at) = inner.opened_at else {
            return;
        };
        if now.saturating_duration_since(opened_at) >= self.config.open_duration {
            inner.transition(CircuitState::HalfOpen, now);
            info!(breaker = %self.name, "open duration elapsed, circuit half-open");
        }
    }
}
