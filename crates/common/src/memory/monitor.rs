//! Background memory pressure monitor
//!
//! Samples process memory on a fixed interval and compares it to an absolute
//! threshold. Subscribers are notified through a [`watch`] channel only when
//! the high/normal flag flips; the latest byte count is updated on every
//! sample without waking anyone.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::sampler::{MemorySampler, ProcessMemorySampler};
use crate::error::{ConfigError, ConfigResult};
use crate::lifecycle::{BackgroundTask, LifecycleResult, TaskSlot, DEFAULT_JOIN_TIMEOUT};
use crate::utils::duration_millis;

/// Configuration for [`MemoryPressureMonitor`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryMonitorConfig {
    /// Usage strictly above this many bytes counts as high pressure
    pub threshold_bytes: u64,
    #[serde(rename = "sample_interval_ms", with = "duration_millis")]
    pub sample_interval: Duration,
}

impl Default for MemoryMonitorConfig {
    fn default() -> Self {
        Self { threshold_bytes: 512 * 1024 * 1024, sample_interval: Duration::from_secs(30) }
    }
}

impl MemoryMonitorConfig {
    pub fn builder() -> MemoryMonitorConfigBuilder {
        MemoryMonitorConfigBuilder::default()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.threshold_bytes == 0 {
            return Err(ConfigError::invalid("threshold_bytes", "must be greater than 0"));
        }
        if self.sample_interval.is_zero() {
            return Err(ConfigError::invalid("sample_interval", "must be greater than zero"));
        }
        Ok(())
    }
}

/// Builder for [`MemoryMonitorConfig`]
#[derive(Debug, Default)]
pub struct MemoryMonitorConfigBuilder {
    config: MemoryMonitorConfig,
}

impl MemoryMonitorConfigBuilder {
    pub fn threshold_bytes(mut self, bytes: u64) -> Self {
        self.config.threshold_bytes = bytes;
        self
    }

    pub fn sample_interval(mut self, interval: Duration) -> Self {
        self.config.sample_interval = interval;
        self
    }

    pub fn build(self) -> ConfigResult<MemoryMonitorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Latest pressure reading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryPressureState {
    pub is_high: bool,
    /// Bytes observed by the most recent successful sample
    pub sampled_bytes: u64,
}

struct MonitorInner {
    config: MemoryMonitorConfig,
    sampler: Box<dyn MemorySampler>,
    state: watch::Sender<MemoryPressureState>,
    sampled: AtomicBool,
    samples_taken: AtomicU64,
}

impl MonitorInner {
    fn check_now(&self) -> MemoryPressureState {
        let Some(bytes) = self.sampler.sample() else {
            debug!("memory sample unavailable, keeping previous state");
            return *self.state.borrow();
        };
        self.sampled.store(true, Ordering::Release);
        self.samples_taken.fetch_add(1, Ordering::Relaxed);

        let threshold = self.config.threshold_bytes;
        let is_high = bytes > threshold;
        let flipped = self.state.send_if_modified(|state| {
            let flipped = state.is_high != is_high;
            state.is_high = is_high;
            state.sampled_bytes = bytes;
            flipped
        });

        if flipped {
            if is_high {
                warn!(bytes, threshold, "memory pressure high");
            } else {
                info!(bytes, threshold, "memory pressure back to normal");
            }
        }

        MemoryPressureState { is_high, sampled_bytes: bytes }
    }
}

/// Periodic process memory sampler publishing pressure flips
///
/// Clones share the same state, channel and background task.
#[derive(Clone)]
pub struct MemoryPressureMonitor {
    inner: Arc<MonitorInner>,
    task: Arc<TaskSlot>,
}

impl std::fmt::Debug for MemoryPressureMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPressureMonitor")
            .field("config", &self.inner.config)
            .field("state", &self.state())
            .finish()
    }
}

impl MemoryPressureMonitor {
    /// Monitor reading this process's memory through `sysinfo`
    pub fn new(config: MemoryMonitorConfig) -> ConfigResult<Self> {
        Self::with_sampler(config, ProcessMemorySampler::new())
    }

    pub fn with_sampler(
        config: MemoryMonitorConfig,
        sampler: impl MemorySampler,
    ) -> ConfigResult<Self> {
        config.validate()?;
        let (state, _) = watch::channel(MemoryPressureState::default());
        Ok(Self {
            inner: Arc::new(MonitorInner {
                config,
                sampler: Box::new(sampler),
                state,
                sampled: AtomicBool::new(false),
                samples_taken: AtomicU64::new(0),
            }),
            task: Arc::new(TaskSlot::new()),
        })
    }

    pub fn config(&self) -> &MemoryMonitorConfig {
        &self.inner.config
    }

    /// Sample immediately, publishing a notification if the flag flips
    pub fn check_now(&self) -> MemoryPressureState {
        self.inner.check_now()
    }

    pub fn state(&self) -> MemoryPressureState {
        *self.inner.state.borrow()
    }

    pub fn is_high(&self) -> bool {
        self.inner.state.borrow().is_high
    }

    /// Bytes from the most recent successful sample, if any
    pub fn last_sample(&self) -> Option<u64> {
        self.inner
            .sampled
            .load(Ordering::Acquire)
            .then(|| self.inner.state.borrow().sampled_bytes)
    }

    pub fn samples_taken(&self) -> u64 {
        self.inner.samples_taken.load(Ordering::Relaxed)
    }

    /// Receiver that is marked changed only when `is_high` flips
    pub fn subscribe(&self) -> watch::Receiver<MemoryPressureState> {
        self.inner.state.subscribe()
    }

    /// Start periodic sampling every `sample_interval`
    pub fn start(&self) -> LifecycleResult<()> {
        let inner = Arc::clone(&self.inner);
        let period = inner.config.sample_interval;
        self.task.start_with(|| {
            BackgroundTask::spawn_periodic("memory-pressure-monitor", period, move |_| {
                let inner = Arc::clone(&inner);
                async move {
                    inner.check_now();
                }
            })
        })
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    pub async fn shutdown(&self) -> LifecycleResult<()> {
        self.task.stop(DEFAULT_JOIN_TIMEOUT).await.map(|_| ())
    }
}
