//! Observability and metrics for the monitor
//!
//! Counter collection for Prometheus-style exposition: ingest outcomes,
//! broadcast volume, subscriber churn, and ingest-path latency percentiles.
//! Eviction counters exist because capacity eviction is normal steady-state
//! behavior that should be visible without being logged as an error.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Core metrics for the monitor service.
pub struct ServiceMetrics {
    // Ingest path
    pub samples_ingested: AtomicU64,
    pub checks_ingested: AtomicU64,
    pub malformed_dropped: AtomicU64,
    pub out_of_order_dropped: AtomicU64,
    pub ingest_latency_ns: Mutex<LatencyTracker>,

    // Retention
    pub buckets_evicted: AtomicU64,
    pub events_evicted: AtomicU64,

    // Distribution
    pub deltas_broadcast: AtomicU64,
    pub snapshots_built: AtomicU64,
    pub subscribers_connected: AtomicU64,
    pub backpressure_disconnects: AtomicU64,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            samples_ingested: AtomicU64::new(0),
            checks_ingested: AtomicU64::new(0),
            malformed_dropped: AtomicU64::new(0),
            out_of_order_dropped: AtomicU64::new(0),
            ingest_latency_ns: Mutex::new(LatencyTracker::new(1000)),
            buckets_evicted: AtomicU64::new(0),
            events_evicted: AtomicU64::new(0),
            deltas_broadcast: AtomicU64::new(0),
            snapshots_built: AtomicU64::new(0),
            subscribers_connected: AtomicU64::new(0),
            backpressure_disconnects: AtomicU64::new(0),
        }
    }

    /// Record a successful ingest with its processing latency.
    pub fn record_ingest(&self, latency_ns: u64) {
        if let Ok(mut tracker) = self.ingest_latency_ns.lock() {
            tracker.record(latency_ns);
        }
    }

    /// Export metrics as a sorted map for exposition.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        m.insert(
            "samples_ingested".to_string(),
            self.samples_ingested.load(Ordering::Relaxed),
        );
        m.insert(
            "checks_ingested".to_string(),
            self.checks_ingested.load(Ordering::Relaxed),
        );
        m.insert(
            "malformed_dropped".to_string(),
            self.malformed_dropped.load(Ordering::Relaxed),
        );
        m.insert(
            "out_of_order_dropped".to_string(),
            self.out_of_order_dropped.load(Ordering::Relaxed),
        );
        m.insert(
            "buckets_evicted".to_string(),
            self.buckets_evicted.load(Ordering::Relaxed),
        );
        m.insert(
            "events_evicted".to_string(),
            self.events_evicted.load(Ordering::Relaxed),
        );
        m.insert(
            "deltas_broadcast".to_string(),
            self.deltas_broadcast.load(Ordering::Relaxed),
        );
        m.insert(
            "snapshots_built".to_string(),
            self.snapshots_built.load(Ordering::Relaxed),
        );
        m.insert(
            "subscribers_connected".to_string(),
            self.subscribers_connected.load(Ordering::Relaxed),
        );
        m.insert(
            "backpressure_disconnects".to_string(),
            self.backpressure_disconnects.load(Ordering::Relaxed),
        );
        if let Ok(tracker) = self.ingest_latency_ns.lock() {
            if let Some(p50) = tracker.percentile(50) {
                m.insert("ingest_latency_p50_ns".to_string(), p50);
            }
            if let Some(p99) = tracker.percentile(99) {
                m.insert("ingest_latency_p99_ns".to_string(), p99);
            }
        }
        m
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks latency samples for percentile calculation over a bounded window.
pub struct LatencyTracker {
    samples: Vec<u64>,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: Vec::with_capacity(max_samples),
            max_samples,
        }
    }

    /// Record a latency sample.
    pub fn record(&mut self, value: u64) {
        if self.samples.len() >= self.max_samples {
            self.samples.remove(0);
        }
        self.samples.push(value);
    }

    /// Get a percentile value (0-100).
    pub fn percentile(&self, p: usize) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        let idx = (p as f64 / 100.0 * (sorted.len() - 1) as f64) as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }

    /// Average latency.
    pub fn average(&self) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: u64 = self.samples.iter().sum();
        Some(sum / self.samples.len() as u64)
    }

    /// Number of samples recorded.
    pub fn count(&self) -> usize {
        self.samples.len()
    }
}
