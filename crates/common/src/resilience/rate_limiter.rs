//! Per-identifier sliding-window rate limiting
//!
//! Each identifier (a logical caller, an endpoint, a tenant) owns a window of
//! the instants of its admitted requests. At every check, instants that fell
//! out of the trailing window are purged first; the request is admitted iff
//! fewer than `requests_per_window` remain.
//!
//! Windows are locked individually, so callers using different identifiers
//! never serialize on each other. The identifier map itself is a
//! [`DashMap`]; a window's `Arc` is cloned out of the map before its lock is
//! taken so no map shard is held while a window is locked.
//!
//! Windows that stay empty for longer than `idle_multiplier` windows are
//! removed by [`SlidingWindowRateLimiter::sweep_idle`], which the optional
//! background sweeper runs every `sweep_interval`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::clock::{Clock, SystemClock};
use crate::error::{ConfigError, ConfigResult, ErrorClassification, ErrorSeverity};
use crate::lifecycle::{BackgroundTask, LifecycleResult, TaskSlot, DEFAULT_JOIN_TIMEOUT};
use crate::utils::duration_millis;

/// Configuration for [`SlidingWindowRateLimiter`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Requests admitted per identifier within one window
    pub requests_per_window: u32,
    /// Length of the trailing window
    #[serde(rename = "window_ms", with = "duration_millis")]
    pub window: Duration,
    /// How often the background sweeper looks for idle windows
    #[serde(rename = "sweep_interval_ms", with = "duration_millis")]
    pub sweep_interval: Duration,
    /// A window empty for longer than `window * idle_multiplier` is dropped
    pub idle_multiplier: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 100,
            window: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(60),
            idle_multiplier: 10,
        }
    }
}

impl RateLimiterConfig {
    pub fn builder() -> RateLimiterConfigBuilder {
        RateLimiterConfigBuilder::new()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.requests_per_window == 0 {
            return Err(ConfigError::invalid("requests_per_window", "must be greater than 0"));
        }
        if self.window.is_zero() {
            return Err(ConfigError::invalid("window", "must be greater than zero"));
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::invalid("sweep_interval", "must be greater than zero"));
        }
        if self.idle_multiplier == 0 {
            return Err(ConfigError::invalid("idle_multiplier", "must be greater than 0"));
        }
        Ok(())
    }

    fn idle_after(&self) -> Duration {
        self.window.checked_mul(self.idle_multiplier).unwrap_or(Duration::MAX)
    }
}

/// Builder for [`RateLimiterConfig`]
#[derive(Debug, Default)]
pub struct RateLimiterConfigBuilder {
    config: RateLimiterConfig,
}

impl RateLimiterConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests_per_window(mut self, requests: u32) -> Self {
        self.config.requests_per_window = requests;
        self
    }

    pub fn window(mut self, window: Duration) -> Self {
        self.config.window = window;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    pub fn idle_multiplier(mut self, multiplier: u32) -> Self {
        self.config.idle_multiplier = multiplier;
        self
    }

    pub fn build(self) -> ConfigResult<RateLimiterConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Admission was refused for an identifier
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rate limit exceeded for `{identifier}`: {limit} requests per {window:?}")]
pub struct RateLimitExceeded {
    pub identifier: String,
    pub limit: u32,
    pub window: Duration,
    /// Time until the oldest request in the window expires
    pub retry_after: Option<Duration>,
}

impl ErrorClassification for RateLimitExceeded {
    fn is_retryable(&self) -> bool {
        true
    }

    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Warning
    }

    fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

/// Snapshot of one identifier's window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    /// Requests still admissible right now
    pub remaining: u32,
    pub limit: u32,
    /// Start of the trailing window
    pub window_start: Instant,
    /// When the oldest request leaves the window; `None` while capacity remains
    /// or when that instant is beyond the clock's range
    pub next_reset: Option<Instant>,
}

#[derive(Debug)]
struct Window {
    requests: VecDeque<Instant>,
    last_seen: Instant,
}

impl Window {
    fn new(now: Instant) -> Self {
        Self { requests: VecDeque::new(), last_seen: now }
    }

    fn purge(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.requests.front() {
            if now.saturating_duration_since(oldest) >= window {
                self.requests.pop_front();
            } else {
                break;
            }
        }
    }
}

struct Inner<C> {
    config: RateLimiterConfig,
    clock: C,
    windows: DashMap<String, Arc<Mutex<Window>>>,
}

impl<C: Clock> Inner<C> {
    fn window_for(&self, identifier: &str, now: Instant) -> Arc<Mutex<Window>> {
        if let Some(window) = self.windows.get(identifier) {
            return Arc::clone(window.value());
        }
        Arc::clone(
            self.windows
                .entry(identifier.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(Window::new(now))))
                .value(),
        )
    }

    fn admit(&self, identifier: &str) -> Result<(), RateLimitExceeded> {
        let now = self.clock.now();
        let limit = self.config.requests_per_window;
        let window = self.window_for(identifier, now);

        let mut window = window.lock();
        window.purge(now, self.config.window);
        window.last_seen = now;

        if window.requests.len() < limit as usize {
            window.requests.push_back(now);
            return Ok(());
        }

        let retry_after = window
            .requests
            .front()
            .map(|&oldest| self.config.window.saturating_sub(now.saturating_duration_since(oldest)));
        Err(RateLimitExceeded {
            identifier: identifier.to_owned(),
            limit,
            window: self.config.window,
            retry_after,
        })
    }

    fn sweep_idle(&self) -> usize {
        let now = self.clock.now();
        let window = self.config.window;
        let idle_after = self.config.idle_after();
        let mut removed = 0;

        self.windows.retain(|_, entry| {
            // A caller holding a clone is mid-check.
            if Arc::strong_count(entry) > 1 {
                return true;
            }
            let Some(mut state) = entry.try_lock() else {
                return true;
            };
            state.purge(now, window);
            let idle = state.requests.is_empty()
                && now.saturating_duration_since(state.last_seen) > idle_after;
            if idle {
                removed += 1;
            }
            !idle
        });

        if removed > 0 {
            debug!(removed, remaining = self.windows.len(), "swept idle rate-limit windows");
        }
        removed
    }
}

/// Sliding-window rate limiter keyed by identifier
///
/// Clones share windows and the background sweeper.
pub struct SlidingWindowRateLimiter<C: Clock = SystemClock> {
    inner: Arc<Inner<C>>,
    sweeper: Arc<TaskSlot>,
}

impl<C: Clock> Clone for SlidingWindowRateLimiter<C> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner), sweeper: Arc::clone(&self.sweeper) }
    }
}

impl<C: Clock> std::fmt::Debug for SlidingWindowRateLimiter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindowRateLimiter")
            .field("config", &self.inner.config)
            .field("active_windows", &self.inner.windows.len())
            .finish()
    }
}

impl SlidingWindowRateLimiter<SystemClock> {
    pub fn new(config: RateLimiterConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> SlidingWindowRateLimiter<C> {
    pub fn with_clock(config: RateLimiterConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner { config, clock, windows: DashMap::new() }),
            sweeper: Arc::new(TaskSlot::new()),
        })
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.inner.config
    }

    /// Admit one request for `identifier` if the window has room
    pub fn try_acquire(&self, identifier: &str) -> bool {
        match self.inner.admit(identifier) {
            Ok(()) => true,
            Err(rejected) => {
                debug!(identifier, retry_after = ?rejected.retry_after, "rate limit exceeded");
                false
            }
        }
    }

    /// Like [`try_acquire`](Self::try_acquire) but reports the rejection
    pub fn acquire(&self, identifier: &str) -> Result<(), RateLimitExceeded> {
        self.inner.admit(identifier)
    }

    /// Current window state for `identifier` without consuming capacity
    pub fn status(&self, identifier: &str) -> RateLimitStatus {
        let now = self.inner.clock.now();
        let config = &self.inner.config;
        let limit = config.requests_per_window;
        let window_start = now.checked_sub(config.window).unwrap_or(now);

        let window = self.inner.windows.get(identifier).map(|entry| Arc::clone(entry.value()));
        let Some(window) = window else {
            return RateLimitStatus { remaining: limit, limit, window_start, next_reset: None };
        };

        let mut window = window.lock();
        window.purge(now, config.window);
        let used = u32::try_from(window.requests.len()).unwrap_or(u32::MAX);
        let remaining = limit.saturating_sub(used);
        let next_reset = if remaining > 0 {
            None
        } else {
            window.requests.front().and_then(|&oldest| oldest.checked_add(config.window))
        };

        RateLimitStatus { remaining, limit, window_start, next_reset }
    }

    /// Forget the window for `identifier`
    pub fn reset(&self, identifier: &str) {
        if self.inner.windows.remove(identifier).is_some() {
            debug!(identifier, "rate-limit window reset");
        }
    }

    /// Forget every window
    pub fn reset_all(&self) {
        let count = self.inner.windows.len();
        self.inner.windows.clear();
        info!(count, "all rate-limit windows reset");
    }

    /// Number of identifiers currently tracked
    pub fn active_windows(&self) -> usize {
        self.inner.windows.len()
    }

    /// Drop windows that are empty and idle; returns how many were removed
    pub fn sweep_idle(&self) -> usize {
        self.inner.sweep_idle()
    }

    /// Start the periodic idle-window sweep
    pub fn start_sweeper(&self) -> LifecycleResult<()> {
        let inner = Arc::clone(&self.inner);
        let period = inner.config.sweep_interval;
        self.sweeper.start_with(|| {
            BackgroundTask::spawn_periodic("rate-limiter-sweep", period, move |_| {
                let inner = Arc::clone(&inner);
                async move {
                    inner.sweep_idle();
                }
            })
        })
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeper.is_running()
    }

    /// Stop the background sweeper if it is running
    pub async fn shutdown(&self) -> LifecycleResult<()> {
        self.sweeper.stop(DEFAULT_JOIN_TIMEOUT).await.map(|_| ())
    }
}
