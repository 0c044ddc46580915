//! Mock remote dependency for exercising retry, breaker and cache paths

#![allow(clippy::missing_errors_doc)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::RemoteError;

/// Scripted remote call
///
/// Each `call` pops the next scripted outcome. Once the script is empty the
/// fallback outcome is returned; without a fallback the call fails with a
/// network error. Clones share the script and the call counter.
///
/// # Examples
///
/// ```
/// use tollgate_common::error::RemoteError;
/// use tollgate_common::testing::MockRemote;
///
/// # tokio_test::block_on(async {
/// let remote = MockRemote::failing_then(2, RemoteError::network("reset"), "ok".to_string());
/// assert!(remote.call().await.is_err());
/// assert!(remote.call().await.is_err());
/// assert_eq!(remote.call().await.as_deref(), Ok("ok"));
/// assert_eq!(remote.call().await.as_deref(), Ok("ok"));
/// assert_eq!(remote.calls(), 4);
/// # });
/// ```
#[derive(Debug)]
pub struct MockRemote<T> {
    script: Arc<Mutex<VecDeque<Result<T, RemoteError>>>>,
    fallback: Arc<Mutex<Option<Result<T, RemoteError>>>>,
    latency: Arc<Mutex<Option<Duration>>>,
    calls: Arc<AtomicUsize>,
}

impl<T> Clone for MockRemote<T> {
    fn clone(&self) -> Self {
        Self {
            script: Arc::clone(&self.script),
            fallback: Arc::clone(&self.fallback),
            latency: Arc::clone(&self.latency),
            calls: Arc::clone(&self.calls),
        }
    }
}

impl<T: Clone> MockRemote<T> {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            fallback: Arc::new(Mutex::new(None)),
            latency: Arc::new(Mutex::new(None)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Remote that always returns `value`
    pub fn succeeding(value: T) -> Self {
        let remote = Self::new();
        remote.respond_with(Ok(value));
        remote
    }

    /// Remote that always fails with `error`
    pub fn failing(error: RemoteError) -> Self {
        let remote = Self::new();
        remote.respond_with(Err(error));
        remote
    }

    /// Remote that fails `times` times with `error`, then returns `value`
    pub fn failing_then(times: usize, error: RemoteError, value: T) -> Self {
        let remote = Self::succeeding(value);
        for _ in 0..times {
            remote.push_err(error.clone());
        }
        remote
    }

    pub fn push_ok(&self, value: T) {
        self.script.lock().push_back(Ok(value));
    }

    pub fn push_err(&self, error: RemoteError) {
        self.script.lock().push_back(Err(error));
    }

    /// Outcome used once the script runs out
    pub fn respond_with(&self, outcome: Result<T, RemoteError>) {
        *self.fallback.lock() = Some(outcome);
    }

    /// Delay every call by `latency` of tokio time
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock() = Some(latency);
        self
    }

    pub async fn call(&self) -> Result<T, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let scripted = self.script.lock().pop_front();
        match scripted {
            Some(outcome) => outcome,
            None => self
                .fallback
                .lock()
                .clone()
                .unwrap_or_else(|| Err(RemoteError::network("no response scripted"))),
        }
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn reset_calls(&self) {
        self.calls.store(0, Ordering::SeqCst);
    }

    #[must_use]
    pub fn remaining_scripted(&self) -> usize {
        self.script.lock().len()
    }
}

impl<T: Clone> Default for MockRemote<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_then_fallback() {
        let remote = MockRemote::new();
        remote.push_ok(1);
        remote.push_err(RemoteError::validation("bad"));
        remote.respond_with(Ok(9));

        assert_eq!(remote.call().await, Ok(1));
        assert_eq!(remote.call().await, Err(RemoteError::validation("bad")));
        assert_eq!(remote.call().await, Ok(9));
        assert_eq!(remote.calls(), 3);
        assert_eq!(remote.remaining_scripted(), 0);
    }

    #[tokio::test]
    async fn test_unscripted_call_is_network_error() {
        let remote: MockRemote<u8> = MockRemote::new();
        assert!(matches!(remote.call().await, Err(RemoteError::Network { .. })));
    }

    /// Validates latency and shared counters across clones.
    ///
    /// Assertions:
    /// - Confirms a call waits for the configured latency.
    /// - Ensures clones share the call counter.
    #[tokio::test(start_paused = true)]
    async fn test_latency_and_shared_counter() {
        let remote = MockRemote::succeeding("x").with_latency(Duration::from_secs(2));
        let clone = remote.clone();

        let started = tokio::time::Instant::now();
        assert_eq!(clone.call().await, Ok("x"));
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(remote.calls(), 1);

        remote.reset_calls();
        assert_eq!(clone.calls(), 0);
    }
}
