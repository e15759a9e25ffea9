//! Client instrumentation.
//!
//! Four monotonic counters, one per outcome class, kept as relaxed atomics
//! so they can be read cheaply in-process (hit-rate dashboards, tests). Each
//! increment is mirrored through the `metrics` crate facade, so a parent
//! process can export them however it likes (Prometheus, OTEL, ...).
//!
//! # Metric Naming Convention
//! - `mirror_cache_` prefix for all metrics
//! - `_total` suffix for counters

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;

/// Counters shared by every clone of a client.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    cache_hit: AtomicU64,
    cache_miss: AtomicU64,
    store_error: AtomicU64,
    codec_error: AtomicU64,
}

/// A point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub cache_hit: u64,
    pub cache_miss: u64,
    pub store_error: u64,
    pub codec_error: u64,
}

impl CacheMetrics {
    pub(crate) fn record_hit(&self) {
        self.cache_hit.fetch_add(1, Ordering::Relaxed);
        counter!("mirror_cache_hits_total").increment(1);
    }

    pub(crate) fn record_miss(&self) {
        self.cache_miss.fetch_add(1, Ordering::Relaxed);
        counter!("mirror_cache_misses_total").increment(1);
    }

    pub(crate) fn record_store_error(&self) {
        self.store_error.fetch_add(1, Ordering::Relaxed);
        counter!("mirror_cache_store_errors_total").increment(1);
    }

    pub(crate) fn record_codec_error(&self) {
        self.codec_error.fetch_add(1, Ordering::Relaxed);
        counter!("mirror_cache_codec_errors_total").increment(1);
    }

    /// Cache operations that found a record.
    pub fn cache_hit(&self) -> u64 {
        self.cache_hit.load(Ordering::Relaxed)
    }

    /// Cache operations that missed and triggered a load.
    pub fn cache_miss(&self) -> u64 {
        self.cache_miss.load(Ordering::Relaxed)
    }

    /// Cache or document store failures. Misses and not-founds are not
    /// errors.
    pub fn store_error(&self) -> u64 {
        self.store_error.load(Ordering::Relaxed)
    }

    /// Malformed packed records. Should stay at zero absent corruption.
    pub fn codec_error(&self) -> u64 {
        self.codec_error.load(Ordering::Relaxed)
    }

    /// Fraction of cache operations answered without a load. NaN before the
    /// first operation.
    pub fn hit_rate(&self) -> f64 {
        let hit = self.cache_hit() as f64;
        let miss = self.cache_miss() as f64;
        hit / (hit + miss)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cache_hit: self.cache_hit(),
            cache_miss: self.cache_miss(),
            store_error: self.store_error(),
            codec_error: self.codec_error(),
        }
    }
}
