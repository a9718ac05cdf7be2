//! Metrics for the matchmaking engine
//!
//! Lock-free counters shared by the engine and the notification pipeline,
//! plus serialisable snapshots for the stats endpoint and periodic reports.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Monotonic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Point-in-time value that can move both ways
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Saturates at zero
    pub fn sub(&self, n: u64) {
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(n)));
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Running latency summary in microseconds
#[derive(Debug)]
pub struct Histogram {
    count: AtomicU64,
    sum: AtomicU64,
    max: AtomicU64,
}

impl Histogram {
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            max: AtomicU64::new(0),
        }
    }

    pub fn record(&self, elapsed: Duration) {
        let us = elapsed.as_micros() as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(us, Ordering::Relaxed);
        self.max.fetch_max(us, Ordering::Relaxed);
    }

    pub fn avg_us(&self) -> u64 {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            0
        } else {
            self.sum.load(Ordering::Relaxed) / count
        }
    }

    pub fn max_us(&self) -> u64 {
        self.max.load(Ordering::Relaxed)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Engine-side counters
#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub submitted: Counter,
    pub rejected: Counter,
    pub requeued: Counter,
    pub dropped: Counter,
    pub pairs_emitted: Counter,
    pub scan_cycles: Counter,
    pub sweeps: Counter,
    pub sweep_pairs: Counter,
    pub scan_latency: Histogram,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, pending_events: u64) -> EngineMetricsSnapshot {
        EngineMetricsSnapshot {
            submitted: self.submitted.get(),
            rejected: self.rejected.get(),
            requeued: self.requeued.get(),
            dropped: self.dropped.get(),
            pairs_emitted: self.pairs_emitted.get(),
            scan_cycles: self.scan_cycles.get(),
            sweeps: self.sweeps.get(),
            sweep_pairs: self.sweep_pairs.get(),
            scan_latency_avg_us: self.scan_latency.avg_us(),
            scan_latency_max_us: self.scan_latency.max_us(),
            pending_events,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineMetricsSnapshot {
    pub submitted: u64,
    pub rejected: u64,
    pub requeued: u64,
    pub dropped: u64,
    pub pairs_emitted: u64,
    pub scan_cycles: u64,
    pub sweeps: u64,
    pub sweep_pairs: u64,
    pub scan_latency_avg_us: u64,
    pub scan_latency_max_us: u64,
    pub pending_events: u64,
}

/// Notification pipeline counters
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub published: Counter,
    pub delivered: Counter,
    pub failed: Counter,
    pub stale: Counter,
    pub panics: Counter,
    pub missing_handles: Counter,
    pub mirrored: Counter,
    pub delivery_latency: Histogram,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn processed(&self) -> u64 {
        self.delivered.get() + self.failed.get()
    }

    pub fn snapshot(&self, queued: usize) -> PipelineMetricsSnapshot {
        PipelineMetricsSnapshot {
            published: self.published.get(),
            delivered: self.delivered.get(),
            failed: self.failed.get(),
            stale: self.stale.get(),
            panics: self.panics.get(),
            missing_handles: self.missing_handles.get(),
            mirrored: self.mirrored.get(),
            delivery_latency_avg_us: self.delivery_latency.avg_us(),
            delivery_latency_max_us: self.delivery_latency.max_us(),
            queued,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineMetricsSnapshot {
    pub published: u64,
    pub delivered: u64,
    pub failed: u64,
    pub stale: u64,
    pub panics: u64,
    pub missing_handles: u64,
    pub mirrored: u64,
    pub delivery_latency_avg_us: u64,
    pub delivery_latency_max_us: u64,
    pub queued: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gauge_saturates() {
        let g = Gauge::new();
        g.add(2);
        g.sub(5);
        assert_eq!(g.get(), 0);
    }

    #[test]
    fn test_histogram() {
        let h = Histogram::new();
        assert_eq!(h.avg_us(), 0);
        h.record(Duration::from_micros(10));
        h.record(Duration::from_micros(30));
        assert_eq!(h.avg_us(), 20);
        assert_eq!(h.max_us(), 30);
    }

    #[test]
    fn test_engine_snapshot() {
        let m = EngineMetrics::new();
        m.submitted.add(3);
        m.rejected.increment();
        let snap = m.snapshot(7);
        assert_eq!(snap.submitted, 3);
        assert_eq!(snap.rejected, 1);
        assert_eq!(snap.pending_events, 7);
    }
}
