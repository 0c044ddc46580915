//! Adaptive key/value cache
//!
//! Entries expire by TTL classes derived from key prefixes, new entries get a
//! shortened TTL while memory pressure is high, and the number of tracked keys
//! is bounded by synchronous least-recently-used eviction inside `set`.
//!
//! Entries live in a [`DashMap`], so operations on a single key are atomic
//! with respect to each other. Cross-key operations (`clear`, eviction, the
//! expiration sweep) are best-effort and may race with concurrent `set`s.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::config::AdaptiveCacheConfig;
use super::size::Cacheable;
use super::stats::{CacheStats, MetricsCollector};
use super::ttl::TtlPolicy;
use crate::error::ConfigResult;
use crate::lifecycle::{BackgroundTask, LifecycleResult, TaskSlot, DEFAULT_JOIN_TIMEOUT};
use crate::memory::{MemoryPressureMonitor, MemoryPressureState};
use crate::resilience::{Clock, ResilienceError, ResilienceResult, SystemClock};

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    size_bytes: usize,
    last_access: Instant,
    // Tie-breaker for entries touched at the same instant.
    access_seq: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

struct CacheInner<V, C> {
    config: AdaptiveCacheConfig,
    ttl: TtlPolicy,
    clock: C,
    entries: DashMap<String, CacheEntry<V>>,
    in_flight: DashMap<String, Arc<AsyncMutex<()>>>,
    pressure: OnceLock<watch::Receiver<MemoryPressureState>>,
    access_seq: AtomicU64,
    metrics: MetricsCollector,
}

impl<V: Cacheable, C: Clock> CacheInner<V, C> {
    fn next_seq(&self) -> u64 {
        self.access_seq.fetch_add(1, Ordering::Relaxed)
    }

    fn under_pressure(&self) -> bool {
        self.pressure.get().is_some_and(|rx| rx.borrow().is_high)
    }

    fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = !entry.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        self.metrics.record_expirations(removed as u64);
        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "purged expired cache entries");
        }
        removed
    }

    fn evict_lru(&self) -> usize {
        let tracked = self.entries.len();
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let target = ((tracked as f64 * self.config.eviction_fraction).ceil() as usize).max(1);

        let mut candidates: Vec<(Instant, u64, String)> = self
            .entries
            .iter()
            .map(|entry| (entry.last_access, entry.access_seq, entry.key().clone()))
            .collect();
        candidates.sort_unstable_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        let mut evicted = 0;
        for (_, _, key) in candidates.into_iter().take(target) {
            if self.entries.remove(&key).is_some() {
                evicted += 1;
            }
        }

        self.metrics.record_evictions(evicted as u64);
        info!(evicted, remaining = self.entries.len(), "evicted least recently used cache entries");
        evicted
    }
}

/// Holds a key's single-flight gate; unregisters it on drop once no other
/// caller is queued, including when the `get_or_set` future is abandoned
struct InFlightGate<'a> {
    in_flight: &'a DashMap<String, Arc<AsyncMutex<()>>>,
    key: &'a str,
    gate: Arc<AsyncMutex<()>>,
}

impl Drop for InFlightGate<'_> {
    fn drop(&mut self) {
        // One reference in the map plus ours means nobody else is waiting.
        self.in_flight.remove_if(self.key, |_, entry| {
            Arc::ptr_eq(entry, &self.gate) && Arc::strong_count(entry) <= 2
        });
    }
}

/// Memory-aware TTL cache keyed by string
///
/// Clones share entries, statistics and the expiration sweeper.
pub struct AdaptiveCache<V: Cacheable, C: Clock = SystemClock> {
    inner: Arc<CacheInner<V, C>>,
    sweeper: Arc<TaskSlot>,
}

impl<V: Cacheable, C: Clock> Clone for AdaptiveCache<V, C> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner), sweeper: Arc::clone(&self.sweeper) }
    }
}

impl<V: Cacheable, C: Clock> std::fmt::Debug for AdaptiveCache<V, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveCache")
            .field("tracked_keys", &self.inner.entries.len())
            .field("max_tracked_keys", &self.inner.config.max_tracked_keys)
            .finish()
    }
}

impl<V: Cacheable> AdaptiveCache<V, SystemClock> {
    pub fn new(config: AdaptiveCacheConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<V: Cacheable, C: Clock> AdaptiveCache<V, C> {
    pub fn with_clock(config: AdaptiveCacheConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;
        let ttl = TtlPolicy::from_config(&config);
        Ok(Self {
            inner: Arc::new(CacheInner {
                config,
                ttl,
                clock,
                entries: DashMap::new(),
                in_flight: DashMap::new(),
                pressure: OnceLock::new(),
                access_seq: AtomicU64::new(0),
                metrics: MetricsCollector::default(),
            }),
            sweeper: Arc::new(TaskSlot::new()),
        })
    }

    pub fn config(&self) -> &AdaptiveCacheConfig {
        &self.inner.config
    }

    /// Follow `monitor`'s pressure state; returns `false` if a signal was
    /// already attached
    pub fn attach_memory_monitor(&self, monitor: &MemoryPressureMonitor) -> bool {
        self.attach_pressure_signal(monitor.subscribe())
    }

    pub fn attach_pressure_signal(&self, signal: watch::Receiver<MemoryPressureState>) -> bool {
        self.inner.pressure.set(signal).is_ok()
    }

    /// Whether newly set entries currently get the shortened pressure TTL
    pub fn is_under_pressure(&self) -> bool {
        self.inner.under_pressure()
    }

    /// Look up `key`, refreshing its last access on a hit
    ///
    /// An expired entry is removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let inner = &self.inner;
        let now = inner.clock.now();

        match inner.entries.get_mut(key) {
            None => {
                inner.metrics.record_miss();
                return None;
            }
            Some(mut entry) if !entry.is_expired(now) => {
                entry.last_access = now;
                entry.access_seq = inner.next_seq();
                inner.metrics.record_hit();
                return Some(entry.value.clone());
            }
            Some(_) => {}
        }

        if inner.entries.remove_if(key, |_, entry| entry.is_expired(now)).is_some() {
            inner.metrics.record_expirations(1);
        }
        inner.metrics.record_miss();
        None
    }

    /// Store `value` with the TTL resolved from the key prefix table
    pub fn set(&self, key: impl Into<String>, value: V) -> bool {
        self.set_with_ttl(key, value, None)
    }

    /// Store `value`; an explicit `ttl` overrides the prefix table
    ///
    /// Returns `false` without storing when the value is not worth caching or
    /// the effective TTL is zero. At the key ceiling the least recently used
    /// share of entries is evicted first.
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) -> bool {
        let inner = &self.inner;
        let key = key.into();

        if !value.is_cacheable() {
            inner.metrics.record_rejected();
            debug!(key = %key, "value not cacheable, skipping");
            return false;
        }

        let ttl = inner.ttl.effective(&key, ttl, inner.under_pressure());
        if ttl.is_zero() {
            debug!(key = %key, "zero ttl, skipping");
            return false;
        }

        let now = inner.clock.now();
        let Some(expires_at) = now.checked_add(ttl) else {
            debug!(key = %key, ?ttl, "ttl beyond the clock's range, skipping");
            return false;
        };

        if !inner.entries.contains_key(&key) && inner.entries.len() >= inner.config.max_tracked_keys
        {
            inner.evict_lru();
        }

        let entry = CacheEntry {
            size_bytes: value.estimated_size() + key.len(),
            value,
            expires_at,
            last_access: now,
            access_seq: inner.next_seq(),
        };
        inner.entries.insert(key, entry);
        inner.metrics.record_insert();
        true
    }

    /// Remove `key`, returning its value if it was present
    pub fn remove(&self, key: &str) -> Option<V> {
        self.inner.entries.remove(key).map(|(_, entry)| entry.value)
    }

    /// Remove every entry
    pub fn clear(&self) {
        let count = self.inner.entries.len();
        self.inner.entries.clear();
        debug!(count, "cache cleared");
    }

    /// Whether `key` holds an unexpired entry; does not count as an access
    pub fn contains_key(&self, key: &str) -> bool {
        let now = self.inner.clock.now();
        self.inner.entries.get(key).is_some_and(|entry| !entry.is_expired(now))
    }

    /// Tracked keys, including expired entries not yet purged
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Sum of the estimated sizes of tracked entries
    pub fn size_bytes(&self) -> u64 {
        self.inner.entries.iter().map(|entry| entry.size_bytes as u64).sum()
    }

    /// Drop every expired entry; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        self.inner.purge_expired()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.metrics.snapshot(self.len(), self.inner.config.max_tracked_keys, self.size_bytes())
    }

    pub fn reset_stats(&self) {
        self.inner.metrics.reset();
    }

    /// Return the cached value for `key` or produce, cache and return it
    ///
    /// Concurrent misses on the same key wait for a single factory call when
    /// `single_flight` is enabled. Factory errors are returned and nothing is
    /// cached. Cancellation while waiting or while the factory runs yields
    /// [`ResilienceError::Cancelled`]. A value that is not worth caching is
    /// returned without being stored.
    #[instrument(skip(self, cancel, factory))]
    pub async fn get_or_set<F, Fut, E>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        cancel: &CancellationToken,
        factory: F,
    ) -> ResilienceResult<V, E>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ResilienceResult<V, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        if !self.inner.config.single_flight {
            return self.load(key, ttl, cancel, factory).await;
        }

        let gate = InFlightGate {
            in_flight: &self.inner.in_flight,
            key,
            gate: Arc::clone(self.inner.in_flight.entry(key.to_owned()).or_default().value()),
        };
        self.load_exclusive(&gate.gate, key, ttl, cancel, factory).await
    }

    async fn load_exclusive<F, Fut, E>(
        &self,
        gate: &AsyncMutex<()>,
        key: &str,
        ttl: Option<Duration>,
        cancel: &CancellationToken,
        factory: F,
    ) -> ResilienceResult<V, E>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ResilienceResult<V, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let _guard = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ResilienceError::Cancelled),
            guard = gate.lock() => guard,
        };

        // Another caller may have filled the key while we waited.
        if let Some(value) = self.get(key) {
            debug!("filled by concurrent caller");
            return Ok(value);
        }
        self.load(key, ttl, cancel, factory).await
    }

    async fn load<F, Fut, E>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        cancel: &CancellationToken,
        factory: F,
    ) -> ResilienceResult<V, E>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ResilienceResult<V, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        if cancel.is_cancelled() {
            return Err(ResilienceError::Cancelled);
        }
        let value = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ResilienceError::Cancelled),
            result = factory(cancel.clone()) => result?,
        };

        if !self.set_with_ttl(key, value.clone(), ttl) {
            debug!("factory value returned without caching");
        }
        Ok(value)
    }

    /// Start the periodic expiration sweep
    pub fn start_expiration_sweep(&self) -> LifecycleResult<()> {
        let inner = Arc::clone(&self.inner);
        let period = inner.config.expiration_sweep_interval;
        self.sweeper.start_with(|| {
            BackgroundTask::spawn_periodic("cache-expiration-sweep", period, move |_| {
                let inner = Arc::clone(&inner);
                async move {
                    inner.purge_expired();
                }
            })
        })
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeper.is_running()
    }

    pub async fn shutdown(&self) -> LifecycleResult<()> {
        self.sweeper.stop(DEFAULT_JOIN_TIMEOUT).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for TTL expiry, pressure coupling, LRU eviction and
    //! single-flight loading.

    use std::sync::atomic::AtomicU32;

    use super::*;
    use crate::cache::TtlRule;
    use crate::error::RemoteError;
    use crate::memory::{FixedMemorySampler, MemoryMonitorConfig};
    use crate::resilience::MockClock;

    fn cache_with(max_keys: usize) -> (AdaptiveCache<String, MockClock>, MockClock) {
        let clock = MockClock::new();
        let config = AdaptiveCacheConfig::builder()
            .max_tracked_keys(max_keys)
            .ttl_rule(TtlRule::new("projects*", Duration::from_secs(3600)))
            .ttl_rule(TtlRule::new("workitems_*", Duration::from_secs(120)))
            .default_ttl(Duration::from_secs(300))
            .build()
            .unwrap();
        (AdaptiveCache::with_clock(config, clock.clone()).unwrap(), clock)
    }

    fn value(s: &str) -> String {
        s.to_string()
    }

    /// Validates set/get and expiry at the resolved TTL.
    ///
    /// Assertions:
    /// - Confirms an immediate hit after `set`.
    /// - Confirms a hit just before and a miss exactly at the 1h TTL of the
    ///   `projects` class.
    #[test]
    fn test_set_get_and_expiry() {
        let (cache, clock) = cache_with(100);
        assert!(cache.set("projects:a", value("alpha")));
        assert_eq!(cache.get("projects:a"), Some(value("alpha")));

        clock.advance(Duration::from_secs(3599));
        assert_eq!(cache.get("projects:a"), Some(value("alpha")));

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get("projects:a"), None);
        assert_eq!(cache.len(), 0);

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expirations, 1);
    }

    #[test]
    fn test_ttl_classes_and_explicit_ttl() {
        let (cache, clock) = cache_with(100);
        cache.set("workitems_open", value("w"));
        cache.set("other", value("o"));
        cache.set_with_ttl("projects:b", value("p"), Some(Duration::from_secs(10)));

        clock.advance(Duration::from_secs(10));
        assert!(!cache.contains_key("projects:b"));
        assert!(cache.contains_key("workitems_open"));

        clock.advance(Duration::from_secs(110));
        assert!(!cache.contains_key("workitems_open"));
        assert!(cache.contains_key("other"));

        clock.advance(Duration::from_secs(180));
        assert!(!cache.contains_key("other"));
    }

    /// Validates pressure-driven TTL shrinkage applies only to new entries.
    ///
    /// Assertions:
    /// - Confirms an entry set under pressure expires at half its TTL.
    /// - Ensures an entry set before pressure keeps its full TTL.
    #[test]
    fn test_memory_pressure_halves_new_ttls() {
        let (cache, clock) = cache_with(100);
        let sampler = FixedMemorySampler::new(10);
        let monitor = MemoryPressureMonitor::with_sampler(
            MemoryMonitorConfig::builder().threshold_bytes(100).build().unwrap(),
            sampler.clone(),
        )
        .unwrap();
        assert!(cache.attach_memory_monitor(&monitor));
        assert!(!cache.attach_memory_monitor(&monitor));

        cache.set("before", value("b"));

        sampler.set(1000);
        monitor.check_now();
        assert!(cache.is_under_pressure());
        cache.set("during", value("d"));

        clock.advance(Duration::from_secs(150));
        assert!(!cache.contains_key("during"));
        assert!(cache.contains_key("before"));

        sampler.set(10);
        monitor.check_now();
        assert!(!cache.is_under_pressure());
    }

    /// Validates LRU eviction at the key ceiling.
    ///
    /// Assertions:
    /// - Confirms the least recently accessed key is evicted, not the oldest
    ///   inserted one that was read since.
    /// - Confirms the new key is present and the count stays at the ceiling.
    #[test]
    fn test_lru_eviction_at_capacity() {
        let (cache, clock) = cache_with(4);
        for i in 0..4 {
            cache.set(format!("k{i}"), value("v"));
            clock.advance_millis(10);
        }
        assert_eq!(cache.get("k0"), Some(value("v")));
        clock.advance_millis(10);

        cache.set("k4", value("v"));

        assert!(!cache.contains_key("k1"));
        assert!(cache.contains_key("k0"));
        assert!(cache.contains_key("k4"));
        assert_eq!(cache.len(), 4);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_eviction_removes_a_quarter() {
        let (cache, clock) = cache_with(8);
        for i in 0..8 {
            cache.set(format!("k{i}"), value("v"));
            clock.advance_millis(1);
        }

        cache.set("newest", value("v"));

        assert!(!cache.contains_key("k0"));
        assert!(!cache.contains_key("k1"));
        assert!(cache.contains_key("k2"));
        assert!(cache.contains_key("newest"));
        assert_eq!(cache.len(), 7);
    }

    #[test]
    fn test_overwrite_at_capacity_does_not_evict() {
        let (cache, _clock) = cache_with(2);
        cache.set("a", value("1"));
        cache.set("b", value("2"));
        cache.set("a", value("3"));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), Some(value("3")));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_uncacheable_values_are_rejected() {
        let (cache, _clock) = cache_with(10);
        assert!(!cache.set("empty", String::new()));
        assert!(!cache.contains_key("empty"));
        assert!(!cache.set_with_ttl("zero", value("x"), Some(Duration::ZERO)));
        assert_eq!(cache.stats().rejected, 1);
    }

    #[test]
    fn test_remove_and_clear() {
        let (cache, _clock) = cache_with(10);
        cache.set("a", value("1"));
        cache.set("b", value("2"));

        assert_eq!(cache.remove("a"), Some(value("1")));
        assert_eq!(cache.remove("a"), None);

        cache.clear();
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.size_bytes(), 0);
    }

    #[test]
    fn test_purge_expired() {
        let (cache, clock) = cache_with(10);
        cache.set_with_ttl("short", value("s"), Some(Duration::from_secs(1)));
        cache.set_with_ttl("long", value("l"), Some(Duration::from_secs(100)));

        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_size_accounting() {
        let (cache, _clock) = cache_with(10);
        cache.set("a", "x".repeat(100));
        let with_one = cache.size_bytes();
        assert!(with_one >= 101);

        cache.set("a", "x".repeat(10));
        assert_eq!(cache.size_bytes(), with_one - 90);

        cache.remove("a");
        assert_eq!(cache.size_bytes(), 0);
    }

    /// Validates `get_or_set` caches the factory value and skips the
    /// factory on a hit.
    ///
    /// Assertions:
    /// - Confirms the factory runs exactly once across two calls.
    #[tokio::test]
    async fn test_get_or_set_caches_value() {
        let (cache, _clock) = cache_with(10);
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            let v = cache
                .get_or_set("projects:1", None, &cancel, |_| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ResilienceError<RemoteError>>(value("loaded"))
                })
                .await
                .unwrap();
            assert_eq!(v, "loaded");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_or_set_error_is_not_cached() {
        let (cache, _clock) = cache_with(10);
        let cancel = CancellationToken::new();

        let err = cache
            .get_or_set("k", None, &cancel, |_| async {
                Err::<String, _>(ResilienceError::operation(RemoteError::network("down")))
            })
            .await
            .unwrap_err();
        assert_eq!(err.operation_error(), Some(&RemoteError::network("down")));
        assert!(!cache.contains_key("k"));
        assert!(cache.inner.in_flight.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_or_set_cancellation() {
        let (cache, _clock) = cache_with(10);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result = cache
            .get_or_set("slow", None, &cancel, |_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, ResilienceError<RemoteError>>(value("late"))
            })
            .await;

        assert!(matches!(result, Err(ResilienceError::Cancelled)));
        assert!(!cache.contains_key("slow"));
    }

    /// Validates single-flight de-duplication of concurrent misses.
    ///
    /// Assertions:
    /// - Confirms ten concurrent callers see the same value.
    /// - Confirms the factory ran once and the in-flight map is empty after.
    #[tokio::test(start_paused = true)]
    async fn test_get_or_set_single_flight() {
        let (cache, _clock) = cache_with(10);
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let callers = (0..10).map(|_| {
            let cache = cache.clone();
            let cancel = cancel.clone();
            let calls = Arc::clone(&calls);
            async move {
                cache
                    .get_or_set("workitems_shared", None, &cancel, |_| async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, ResilienceError<RemoteError>>(value("shared"))
                    })
                    .await
            }
        });
        let results = futures::future::join_all(callers).await;

        assert!(results.iter().all(|r| r.as_deref().ok() == Some("shared")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.inner.in_flight.is_empty());
    }

    /// Validates that abandoned loads release their single-flight gate.
    ///
    /// Assertions:
    /// - Ensures dropping pending `get_or_set` futures on 100 distinct keys
    ///   leaves no in-flight entries behind.
    /// - Ensures a later load of an abandoned key runs its factory normally.
    #[tokio::test(start_paused = true)]
    async fn test_abandoned_get_or_set_releases_gate() {
        let (cache, _clock) = cache_with(1000);
        let cancel = CancellationToken::new();

        for i in 0..100 {
            let key = format!("users:{i}");
            let pending = cache.get_or_set(&key, None, &cancel, |_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, ResilienceError<RemoteError>>(value("late"))
            });
            let outcome = tokio::time::timeout(Duration::from_millis(5), pending).await;
            assert!(outcome.is_err());
        }
        assert!(cache.inner.in_flight.is_empty());

        let loaded = cache
            .get_or_set("users:7", None, &cancel, |_| async {
                Ok::<_, ResilienceError<RemoteError>>(value("grace"))
            })
            .await
            .unwrap();
        assert_eq!(loaded, "grace");
        assert!(cache.inner.in_flight.is_empty());
    }

    /// Validates that TTLs past the clock's range never panic.
    ///
    /// Assertions:
    /// - Ensures `Duration::MAX` is stored, capped at `MAX_ENTRY_TTL`.
    /// - Ensures `get_or_set` with an explicit `Duration::MAX` caches the value.
    #[tokio::test]
    async fn test_huge_explicit_ttl_is_capped() {
        let (cache, clock) = cache_with(10);
        assert!(cache.set_with_ttl("users:1", value("ada"), Some(Duration::MAX)));
        clock.advance(Duration::from_secs(10 * 365 * 24 * 60 * 60));
        assert_eq!(cache.get("users:1").as_deref(), Some("ada"));

        let loaded = cache
            .get_or_set("users:2", Some(Duration::MAX), &CancellationToken::new(), |_| async {
                Ok::<_, ResilienceError<RemoteError>>(value("linus"))
            })
            .await
            .unwrap();
        assert_eq!(loaded, "linus");
        assert!(cache.contains_key("users:2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiration_sweep_task() {
        let clock = MockClock::new();
        let config = AdaptiveCacheConfig::builder()
            .expiration_sweep_interval(Duration::from_secs(60))
            .build()
            .unwrap();
        let cache: AdaptiveCache<String, MockClock> =
            AdaptiveCache::with_clock(config, clock.clone()).unwrap();
        cache.set_with_ttl("a", value("1"), Some(Duration::from_secs(5)));
        cache.start_expiration_sweep().unwrap();

        clock.advance(Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(cache.is_empty());

        cache.shutdown().await.unwrap();
        assert!(!cache.is_sweeping());
    }
}
