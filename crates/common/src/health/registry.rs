//! Registry of named asynchronous health checks
//!
//! Checks run concurrently under a per-check timeout. A check that returns an
//! error, panics or times out produces an unhealthy [`HealthStatus`] carrying
//! the captured error, so `check_all` itself never fails. After each run the
//! registry compares every check's healthy flag with the previous run and
//! broadcasts a [`HealthChangeEvent`] for each flip.

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::status::{overall_description, HealthReport, HealthStatus};
use crate::error::{ConfigError, ConfigResult};
use crate::lifecycle::{BackgroundTask, LifecycleResult, TaskSlot, DEFAULT_JOIN_TIMEOUT};
use crate::utils::duration_millis;

/// Error type checks report failures with
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Asynchronous health check
#[async_trait]
pub trait HealthCheck: Send + Sync + 'static {
    async fn check(&self, cancel: &CancellationToken) -> Result<HealthStatus, BoxError>;
}

/// Adapter turning an async closure into a [`HealthCheck`]
pub struct FnHealthCheck<F> {
    check_fn: F,
}

impl<F> FnHealthCheck<F> {
    pub fn new(check_fn: F) -> Self {
        Self { check_fn }
    }
}

#[async_trait]
impl<F, Fut> HealthCheck for FnHealthCheck<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HealthStatus, BoxError>> + Send + 'static,
{
    async fn check(&self, _cancel: &CancellationToken) -> Result<HealthStatus, BoxError> {
        (self.check_fn)().await
    }
}

/// Failures the registry records on behalf of a check
#[derive(Debug, Error)]
pub enum HealthCheckError {
    #[error("health check `{check}` panicked: {message}")]
    Panicked { check: String, message: String },

    #[error("health check `{check}` timed out after {timeout:?}")]
    TimedOut { check: String, timeout: Duration },

    #[error("health check `{check}` was cancelled")]
    Cancelled { check: String },
}

/// Configuration for [`HealthCheckRegistry`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthRegistryConfig {
    #[serde(rename = "poll_interval_ms", with = "duration_millis")]
    pub poll_interval: Duration,
    /// Longest a single check may run before it is reported unhealthy
    #[serde(rename = "check_timeout_ms", with = "duration_millis")]
    pub check_timeout: Duration,
}

impl Default for HealthRegistryConfig {
    fn default() -> Self {
        Self { poll_interval: Duration::from_secs(60), check_timeout: Duration::from_secs(10) }
    }
}

impl HealthRegistryConfig {
    pub fn builder() -> HealthRegistryConfigBuilder {
        HealthRegistryConfigBuilder::default()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::invalid("poll_interval", "must be greater than zero"));
        }
        if self.check_timeout.is_zero() {
            return Err(ConfigError::invalid("check_timeout", "must be greater than zero"));
        }
        Ok(())
    }
}

/// Builder for [`HealthRegistryConfig`]
#[derive(Debug, Default)]
pub struct HealthRegistryConfigBuilder {
    config: HealthRegistryConfig,
}

impl HealthRegistryConfigBuilder {
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn check_timeout(mut self, timeout: Duration) -> Self {
        self.config.check_timeout = timeout;
        self
    }

    pub fn build(self) -> ConfigResult<HealthRegistryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Published when a check's healthy flag differs from its previous run
#[derive(Debug, Clone)]
pub struct HealthChangeEvent {
    pub name: String,
    pub previous: HealthStatus,
    pub current: HealthStatus,
}

struct RegistryInner {
    config: HealthRegistryConfig,
    checks: RwLock<BTreeMap<String, Arc<dyn HealthCheck>>>,
    // Each result is tagged with the run that produced it.
    last_results: Mutex<BTreeMap<String, (u64, HealthStatus)>>,
    runs_started: AtomicU64,
    events: broadcast::Sender<HealthChangeEvent>,
}

impl RegistryInner {
    async fn check_all(&self, cancel: &CancellationToken) -> BTreeMap<String, HealthStatus> {
        let run = self.runs_started.fetch_add(1, Ordering::SeqCst) + 1;
        let checks: Vec<(String, Arc<dyn HealthCheck>)> = self
            .checks
            .read()
            .iter()
            .map(|(name, check)| (name.clone(), Arc::clone(check)))
            .collect();

        let timeout = self.config.check_timeout;
        let results: BTreeMap<String, HealthStatus> =
            join_all(checks.into_iter().map(|(name, check)| async move {
                let status = run_check(&name, check.as_ref(), timeout, cancel).await;
                (name, status)
            }))
            .await
            .into_iter()
            .collect();

        if !cancel.is_cancelled() {
            self.publish_changes(run, &results);
        }
        results
    }

    /// Record `results` from run number `run` and broadcast flips
    ///
    /// A run that finishes after a later-started run has already recorded a
    /// check leaves that check untouched.
    fn publish_changes(&self, run: u64, results: &BTreeMap<String, HealthStatus>) {
        let mut changes = Vec::new();
        {
            let mut last = self.last_results.lock();
            for (name, current) in results {
                if last.get(name).is_some_and(|(recorded, _)| *recorded > run) {
                    debug!(check = %name, run, "discarding result from an older run");
                    continue;
                }
                if let Some((_, previous)) = last.insert(name.clone(), (run, current.clone())) {
                    if previous.is_healthy != current.is_healthy {
                        changes.push(HealthChangeEvent {
                            name: name.clone(),
                            previous,
                            current: current.clone(),
                        });
                    }
                }
            }
        }

        for event in changes {
            if event.current.is_healthy {
                info!(check = %event.name, "health check recovered");
            } else {
                warn!(
                    check = %event.name,
                    description = event.current.description.as_deref().unwrap_or(""),
                    "health check became unhealthy"
                );
            }
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
    }
}

async fn run_check(
    name: &str,
    check: &dyn HealthCheck,
    timeout: Duration,
    cancel: &CancellationToken,
) -> HealthStatus {
    let started = Instant::now();
    let attempt = AssertUnwindSafe(check.check(cancel)).catch_unwind();

    let status = tokio::select! {
        biased;
        () = cancel.cancelled() => {
            HealthStatus::from_error(HealthCheckError::Cancelled { check: name.to_owned() })
        }
        outcome = tokio::time::timeout(timeout, attempt) => match outcome {
            Ok(Ok(Ok(status))) => status,
            Ok(Ok(Err(error))) => HealthStatus::from_shared_error(Arc::from(error)),
            Ok(Err(panic)) => HealthStatus::from_error(HealthCheckError::Panicked {
                check: name.to_owned(),
                message: panic_message(&*panic),
            }),
            Err(_) => HealthStatus::from_error(HealthCheckError::TimedOut {
                check: name.to_owned(),
                timeout,
            }),
        },
    };

    let elapsed = started.elapsed();
    debug!(check = name, healthy = status.is_healthy, ?elapsed, "health check finished");
    status.with_response_time(elapsed)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

/// Named health checks with aggregation, change events and periodic polling
///
/// Clones share the same checks, history and poller.
///
/// # Example
/// ```rust
/// use tollgate_common::health::{HealthCheckRegistry, HealthRegistryConfig, HealthStatus};
/// use tokio_util::sync::CancellationToken;
///
/// # tokio_test::block_on(async {
/// let registry = HealthCheckRegistry::new(HealthRegistryConfig::default()).unwrap();
/// registry.register_fn("self", || async { Ok(HealthStatus::healthy()) });
///
/// let overall = registry.check_overall(&CancellationToken::new()).await;
/// assert!(overall.is_healthy);
/// # });
/// ```
#[derive(Clone)]
pub struct HealthCheckRegistry {
    inner: Arc<RegistryInner>,
    poller: Arc<TaskSlot>,
}

impl std::fmt::Debug for HealthCheckRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthCheckRegistry")
            .field("config", &self.inner.config)
            .field("checks", &self.names())
            .finish()
    }
}

impl HealthCheckRegistry {
    pub fn new(config: HealthRegistryConfig) -> ConfigResult<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            inner: Arc::new(RegistryInner {
                config,
                checks: RwLock::new(BTreeMap::new()),
                last_results: Mutex::new(BTreeMap::new()),
                runs_started: AtomicU64::new(0),
                events,
            }),
            poller: Arc::new(TaskSlot::new()),
        })
    }

    pub fn config(&self) -> &HealthRegistryConfig {
        &self.inner.config
    }

    /// Register `check` under `name`, replacing any previous check
    ///
    /// Returns `true` when a check with that name already existed.
    pub fn register(&self, name: impl Into<String>, check: impl HealthCheck) -> bool {
        let name = name.into();
        let replaced = self.inner.checks.write().insert(name.clone(), Arc::new(check)).is_some();
        debug!(check = %name, replaced, "health check registered");
        replaced
    }

    /// Register an async closure as a check
    pub fn register_fn<F, Fut>(&self, name: impl Into<String>, check_fn: F) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HealthStatus, BoxError>> + Send + 'static,
    {
        self.register(name, FnHealthCheck::new(check_fn))
    }

    /// Remove a check and forget its last result
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.inner.checks.write().remove(name).is_some();
        self.inner.last_results.lock().remove(name);
        removed
    }

    /// Registered check names in sorted order
    pub fn names(&self) -> Vec<String> {
        self.inner.checks.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.checks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.checks.read().is_empty()
    }

    /// Run every check concurrently and return the per-check results
    #[instrument(skip_all)]
    pub async fn check_all(&self, cancel: &CancellationToken) -> BTreeMap<String, HealthStatus> {
        self.inner.check_all(cancel).await
    }

    /// Healthy iff every registered check is healthy
    ///
    /// The description carries the failing count and `data` holds each
    /// check's healthy flag.
    pub async fn check_overall(&self, cancel: &CancellationToken) -> HealthStatus {
        let results = self.check_all(cancel).await;
        let failing = results.values().filter(|status| !status.is_healthy).count();

        let mut overall = HealthStatus { is_healthy: failing == 0, ..HealthStatus::healthy() }
            .with_description(overall_description(failing, results.len()));
        for (name, status) in &results {
            overall = overall.with_data(name.clone(), status.is_healthy);
        }
        overall
    }

    /// Run every check and build a serializable report
    pub async fn report(&self, cancel: &CancellationToken) -> HealthReport {
        HealthReport::from_results(&self.check_all(cancel).await)
    }

    /// Result of the most recent run for `name`
    pub fn last_result(&self, name: &str) -> Option<HealthStatus> {
        self.inner.last_results.lock().get(name).map(|(_, status)| status.clone())
    }

    /// Receiver for healthy/unhealthy transitions
    pub fn subscribe(&self) -> broadcast::Receiver<HealthChangeEvent> {
        self.inner.events.subscribe()
    }

    /// Run `check_all` every `poll_interval` until shutdown
    pub fn start_polling(&self) -> LifecycleResult<()> {
        let inner = Arc::clone(&self.inner);
        let period = inner.config.poll_interval;
        self.poller.start_with(|| {
            BackgroundTask::spawn_periodic("health-poller", period, move |cancel| {
                let inner = Arc::clone(&inner);
                async move {
                    inner.check_all(&cancel).await;
                }
            })
        })
    }

    pub fn is_polling(&self) -> bool {
        self.poller.is_running()
    }

    pub async fn shutdown(&self) -> LifecycleResult<()> {
        self.poller.stop(DEFAULT_JOIN_TIMEOUT).await.map(|_| ())
    }
}
