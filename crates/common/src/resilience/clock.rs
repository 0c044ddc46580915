//! Monotonic time source shared by the breaker, limiter and cache
//!
//! Production code uses [`SystemClock`]; tests drive [`MockClock`] forward
//! explicitly so open durations, sliding windows and TTLs can be exercised
//! without sleeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of monotonic instants
pub trait Clock: Send + Sync + 'static {
    /// Current instant
    fn now(&self) -> Instant;
}

/// Real monotonic clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl<T: Clock> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Manually advanced clock for deterministic tests
///
/// Clones share the same timeline, so a test can hand one clone to a
/// component and advance another.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    elapsed_nanos: Arc<AtomicU64>,
}

impl MockClock {
    pub fn new() -> Self {
        Self { start: Instant::now(), elapsed_nanos: Arc::new(AtomicU64::new(0)) }
    }

    /// Move time forward by `duration`
    pub fn advance(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.elapsed_nanos.fetch_add(nanos, Ordering::SeqCst);
    }

    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Total time advanced since creation
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_nanos.load(Ordering::SeqCst))
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }

    /// Validates `MockClock::advance` moves `now()` by exactly the duration.
    ///
    /// Assertions:
    /// - Confirms `after.duration_since(before)` equals 5 seconds.
    /// - Confirms `elapsed()` accumulates across calls.
    #[test]
    fn test_mock_clock_advance() {
        let clock = MockClock::new();
        let before = clock.now();

        clock.advance(Duration::from_secs(5));
        let after = clock.now();
        assert_eq!(after.duration_since(before), Duration::from_secs(5));

        clock.advance_millis(250);
        assert_eq!(clock.elapsed(), Duration::from_millis(5250));
    }

    #[test]
    fn test_mock_clock_clones_share_timeline() {
        let clock = MockClock::new();
        let shared = clock.clone();

        shared.advance(Duration::from_secs(10));
        assert_eq!(clock.elapsed(), Duration::from_secs(10));
        assert_eq!(clock.now(), shared.now());
    }
}
