//! Cache statistics and metrics tracking

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Point-in-time statistics for an adaptive cache
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Keys currently tracked (expired entries not yet purged included)
    pub size: usize,

    /// Key ceiling that triggers eviction
    pub max_size: usize,

    /// Sum of estimated sizes of tracked values
    pub size_bytes: u64,

    /// Successful lookups
    pub hits: u64,

    /// Lookups that found nothing or an expired entry
    pub misses: u64,

    /// Values stored
    pub inserts: u64,

    /// Entries removed to make room
    pub evictions: u64,

    /// Expired entries removed lazily or by the sweep
    pub expirations: u64,

    /// Values refused because they carry nothing worth caching
    pub rejected: u64,
}

impl CacheStats {
    /// hits / (hits + misses), or 0 before any lookup
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_accesses();
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn miss_rate(&self) -> f64 {
        if self.total_accesses() == 0 {
            0.0
        } else {
            1.0 - self.hit_rate()
        }
    }

    /// size / max_size
    #[allow(clippy::cast_precision_loss)]
    pub fn fill_percentage(&self) -> f64 {
        if self.max_size == 0 {
            0.0
        } else {
            self.size as f64 / self.max_size as f64
        }
    }

    pub fn total_accesses(&self) -> u64 {
        self.hits + self.misses
    }
}

/// Lock-free counters updated on the cache hot path
#[derive(Debug, Default)]
pub(crate) struct MetricsCollector {
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    rejected: AtomicU64,
}

impl MetricsCollector {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_expirations(&self, count: u64) {
        self.expirations.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, size: usize, max_size: usize, size_bytes: u64) -> CacheStats {
        CacheStats {
            size,
            max_size,
            size_bytes,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.inserts,
            &self.evictions,
            &self.expirations,
            &self.rejected,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates rate calculations on a snapshot.
    ///
    /// Assertions:
    /// - Confirms hit and miss rates from 3 hits and 1 miss.
    /// - Ensures an untouched cache reports zero rates instead of NaN.
    #[test]
    fn test_rates() {
        let stats = CacheStats { hits: 3, misses: 1, size: 5, max_size: 10, ..Default::default() };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert!((stats.miss_rate() - 0.25).abs() < f64::EPSILON);
        assert!((stats.fill_percentage() - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.total_accesses(), 4);

        let empty = CacheStats::default();
        assert!(empty.hit_rate().abs() < f64::EPSILON);
        assert!(empty.miss_rate().abs() < f64::EPSILON);
        assert!(empty.fill_percentage().abs() < f64::EPSILON);
    }

    #[test]
    fn test_collector_snapshot_and_reset() {
        let collector = MetricsCollector::default();
        collector.record_hit();
        collector.record_miss();
        collector.record_insert();
        collector.record_evictions(4);
        collector.record_expirations(1);
        collector.record_rejected();

        let stats = collector.snapshot(7, 10, 512);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.evictions, 4);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.size, 7);
        assert_eq!(stats.size_bytes, 512);

        collector.reset();
        let stats = collector.snapshot(0, 10, 0);
        assert_eq!(stats.hits + stats.misses + stats.inserts + stats.evictions, 0);
    }
}
