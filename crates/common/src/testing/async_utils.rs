//! Async testing utilities
//!
//! Everything here measures time with `tokio::time`, so helpers behave the
//! same under `#[tokio::test(start_paused = true)]`.

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// Assert that an async condition becomes true within a timeout
///
/// # Examples
///
/// ```no_run
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// #[tokio::test]
/// async fn test_eventually() {
///     let flag = Arc::new(AtomicBool::new(false));
///     let setter = Arc::clone(&flag);
///
///     tokio::spawn(async move {
///         tokio::time::sleep(Duration::from_millis(100)).await;
///         setter.store(true, Ordering::SeqCst);
///     });
///
///     tollgate_common::assert_eventually_async!(Duration::from_secs(1), async {
///         flag.load(Ordering::SeqCst)
///     });
/// }
/// ```
#[macro_export]
macro_rules! assert_eventually_async {
    ($timeout:expr, $fut:expr) => {
        $crate::assert_eventually_async!($timeout, std::time::Duration::from_millis(10), $fut)
    };
    ($timeout:expr, $interval:expr, $fut:expr) => {{
        let deadline: std::time::Duration = $timeout;
        let held = $crate::testing::poll_until(deadline, $interval, || async { $fut.await }).await;
        assert!(held, "condition still false after {deadline:?}");
    }};
}

/// Wait for a future to complete with a timeout, returning a Result
pub async fn timeout_ok<F, T>(duration: Duration, fut: F) -> Result<T, tokio::time::error::Elapsed>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, fut).await
}

/// Poll an async condition until it returns true or times out
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
///
/// use tollgate_common::cache::{AdaptiveCache, AdaptiveCacheConfig};
/// use tollgate_common::testing::poll_until;
///
/// #[tokio::test(start_paused = true)]
/// async fn test_sweep_runs() {
///     let cache: AdaptiveCache<u32> = AdaptiveCache::new(AdaptiveCacheConfig::default()).unwrap();
///     cache.start_expiration_sweep().unwrap();
///
///     let emptied = poll_until(Duration::from_secs(120), Duration::from_secs(1), || async {
///         cache.is_empty()
///     })
///     .await;
///     assert!(emptied);
/// }
/// ```
pub async fn poll_until<F, Fut>(timeout: Duration, interval: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();

    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }

    false
}

#[cfg(test)]
mod tests {
    //! Unit tests for testing::async_utils.
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;

    /// Validates `timeout_ok` for a future that finishes in time.
    ///
    /// Assertions:
    /// - Confirms the future's output is returned.
    #[tokio::test(start_paused = true)]
    async fn test_timeout_ok_succeeds() {
        let result = timeout_ok(Duration::from_millis(100), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            42
        })
        .await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_ok_times_out() {
        let result = timeout_ok(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            42
        })
        .await;

        assert!(result.is_err());
    }

    /// Validates `poll_until` with a flag set by another task.
    ///
    /// Assertions:
    /// - Ensures polling observes the flag before the timeout.
    #[tokio::test(start_paused = true)]
    async fn test_poll_until_succeeds() {
        let flag = Arc::new(AtomicBool::new(false));
        let setter = Arc::clone(&flag);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            setter.store(true, Ordering::SeqCst);
        });

        let result = poll_until(Duration::from_secs(1), Duration::from_millis(10), || {
            let flag = Arc::clone(&flag);
            async move { flag.load(Ordering::SeqCst) }
        })
        .await;

        assert!(result);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_times_out() {
        let result =
            poll_until(Duration::from_millis(50), Duration::from_millis(10), || async { false })
                .await;

        assert!(!result);
    }
}
