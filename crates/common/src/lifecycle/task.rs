//! Cancellable background tasks owned by a component
//!
//! Every periodic job in the crate (memory sampling, rate-limit window sweep,
//! cache expiration sweep, health polling) runs as a [`BackgroundTask`]: a
//! spawned loop paired with a [`CancellationToken`] and its [`JoinHandle`].
//! Stopping cancels the token and joins the handle under a timeout. Dropping a
//! task cancels it without waiting.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default time allowed for a stopped task to finish
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Errors raised when starting or stopping background work
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("background task `{task}` is already running")]
    AlreadyRunning { task: String },

    #[error("background task `{task}` requires a running tokio runtime")]
    NoRuntime { task: String },

    #[error("background task `{task}` did not stop within {timeout:?}")]
    JoinTimeout { task: String, timeout: Duration },

    #[error("background task `{task}` terminated abnormally: {message}")]
    JoinFailed { task: String, message: String },
}

/// Result type for lifecycle operations
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Handle to one spawned background loop
#[derive(Debug)]
pub struct BackgroundTask {
    name: Arc<str>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    /// Spawn `body` with a fresh cancellation token
    ///
    /// The body is expected to return promptly once the token is cancelled.
    pub fn spawn<F, Fut>(name: impl Into<String>, body: F) -> LifecycleResult<Self>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name: Arc<str> = Arc::from(name.into());
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| LifecycleError::NoRuntime { task: name.to_string() })?;

        let cancel = CancellationToken::new();
        let handle = runtime.spawn(body(cancel.clone()));
        debug!(task = %name, "background task started");

        Ok(Self { name, cancel, handle: Some(handle) })
    }

    /// Spawn a loop that awaits `tick` once per `period`
    ///
    /// The first tick happens one full period after spawning. Missed ticks are
    /// skipped rather than bunched up. Each tick receives the task's token; a
    /// tick in progress is abandoned when the task is cancelled.
    pub fn spawn_periodic<F, Fut>(
        name: impl Into<String>,
        period: Duration,
        mut tick: F,
    ) -> LifecycleResult<Self>
    where
        F: FnMut(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let period = period.max(MIN_PERIOD);
        Self::spawn(name, move |cancel| async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tick(cancel.clone()) => {}
                }
            }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the spawned loop is still alive
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Request cancellation without waiting
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel the task and wait up to `join_timeout` for it to finish
    pub async fn stop(mut self, join_timeout: Duration) -> LifecycleResult<()> {
        self.cancel.cancel();
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        match tokio::time::timeout(join_timeout, handle).await {
            Ok(Ok(())) => {
                debug!(task = %self.name, "background task stopped");
                Ok(())
            }
            Ok(Err(join_error)) => Err(LifecycleError::JoinFailed {
                task: self.name.to_string(),
                message: join_error.to_string(),
            }),
            Err(_) => {
                warn!(task = %self.name, ?join_timeout, "background task did not stop in time");
                Err(LifecycleError::JoinTimeout { task: self.name.to_string(), timeout: join_timeout })
            }
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        if self.handle.is_some() && !self.cancel.is_cancelled() {
            debug!(task = %self.name, "background task dropped while running; cancelling");
            self.cancel.cancel();
        }
    }
}

/// At-most-one background task owned by a component
///
/// Backs the `start_*`/`shutdown` pairs on the limiter, monitor, cache and
/// health registry.
#[derive(Debug, Default)]
pub struct TaskSlot {
    task: Mutex<Option<BackgroundTask>>,
}

impl TaskSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the task produced by `spawn` unless one is already running
    ///
    /// A previous task that already finished on its own is replaced.
    pub fn start_with<F>(&self, spawn: F) -> LifecycleResult<()>
    where
        F: FnOnce() -> LifecycleResult<BackgroundTask>,
    {
        let mut slot = self.task.lock();
        if let Some(existing) = slot.as_ref() {
            if existing.is_running() {
                return Err(LifecycleError::AlreadyRunning { task: existing.name().to_string() });
            }
        }
        *slot = Some(spawn()?);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(BackgroundTask::is_running)
    }

    /// Stop the installed task; returns `false` when nothing was running
    pub async fn stop(&self, join_timeout: Duration) -> LifecycleResult<bool> {
        let task = self.task.lock().take();
        match task {
            Some(task) => task.stop(join_timeout).await.map(|()| true),
            None => Ok(false),
        }
    }
}
