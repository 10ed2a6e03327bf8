//! Internal metrics collection.
//!
//! Collects correlator metrics in-memory; snapshots are logged by the binary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A counter metric.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A gauge metric (can go up or down).
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn set(&self, val: u64) {
        self.0.store(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }
}

/// Histogram for latency tracking.
#[derive(Debug)]
pub struct Histogram {
    /// Buckets: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 5s, 10s
    buckets: [AtomicU64; 11],
    sum: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    const BUCKET_BOUNDS: [u64; 11] = [1, 5, 10, 25, 50, 100, 250, 500, 1000, 5000, 10000];

    pub fn new() -> Self {
        Self {
            buckets: Default::default(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Records a value in milliseconds.
    pub fn observe(&self, ms: u64) {
        self.sum.fetch_add(ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        for (i, &bound) in Self::BUCKET_BOUNDS.iter().enumerate() {
            if ms <= bound {
                self.buckets[i].fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        // Value exceeds all buckets, add to last
        self.buckets[10].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            0.0
        } else {
            self.sum() as f64 / count as f64
        }
    }

    /// Returns bucket counts.
    pub fn buckets(&self) -> Vec<(u64, u64)> {
        Self::BUCKET_BOUNDS
            .iter()
            .zip(self.buckets.iter())
            .map(|(&bound, count)| (bound, count.load(Ordering::Relaxed)))
            .collect()
    }
}

/// Collected metrics for the event correlator.
#[derive(Debug, Default)]
pub struct Metrics {
    // Correlation metrics
    pub events_received: Counter,
    pub events_absorbed: Counter,
    pub events_missed: Counter,
    pub groups_created: Counter,
    pub groups_aggregated: Counter,
    pub duplicate_create_merges: Counter,

    // Expiry metrics
    pub groups_expired: Counter,
    pub groups_forwarded_on_expiry: Counter,
    pub groups_discarded: Counter,
    pub sweeps_run: Counter,
    pub sweep_errors: Counter,

    // Failure metrics
    pub aggregation_errors: Counter,
    pub store_errors: Counter,
    pub listener_errors: Counter,

    // Latency histograms
    pub processing_latency_ms: Histogram,
    pub store_latency_ms: Histogram,

    // Gauges
    pub pending_groups: Gauge,
    pub active_locks: Gauge,
    pub response_waiters: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub events_received: u64,
    pub events_absorbed: u64,
    pub events_missed: u64,
    pub groups_created: u64,
    pub groups_aggregated: u64,
    pub duplicate_create_merges: u64,
    pub groups_expired: u64,
    pub groups_forwarded_on_expiry: u64,
    pub groups_discarded: u64,
    pub sweeps_run: u64,
    pub sweep_errors: u64,
    pub aggregation_errors: u64,
    pub store_errors: u64,
    pub listener_errors: u64,
    pub processing_latency_mean_ms: f64,
    pub processing_latency_buckets: Vec<(u64, u64)>,
    pub store_latency_mean_ms: f64,
    pub pending_groups: u64,
    pub active_locks: u64,
    pub response_waiters: u64,
}

impl Metrics {
    /// Takes a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            events_received: self.events_received.get(),
            events_absorbed: self.events_absorbed.get(),
            events_missed: self.events_missed.get(),
            groups_created: self.groups_created.get(),
            groups_aggregated: self.groups_aggregated.get(),
            duplicate_create_merges: self.duplicate_create_merges.get(),
            groups_expired: self.groups_expired.get(),
            groups_forwarded_on_expiry: self.groups_forwarded_on_expiry.get(),
            groups_discarded: self.groups_discarded.get(),
            sweeps_run: self.sweeps_run.get(),
            sweep_errors: self.sweep_errors.get(),
            aggregation_errors: self.aggregation_errors.get(),
            store_errors: self.store_errors.get(),
            listener_errors: self.listener_errors.get(),
            processing_latency_mean_ms: self.processing_latency_ms.mean(),
            processing_latency_buckets: self.processing_latency_ms.buckets(),
            store_latency_mean_ms: self.store_latency_ms.mean(),
            pending_groups: self.pending_groups.get(),
            active_locks: self.active_locks.get(),
            response_waiters: self.response_waiters.get(),
        }
    }
}

/// Global metrics registry.
pub static METRICS: std::sync::LazyLock<Metrics> = std::sync::LazyLock::new(Metrics::new);

/// Get the global metrics instance.
pub fn metrics() -> &'static Metrics {
    &METRICS
}
