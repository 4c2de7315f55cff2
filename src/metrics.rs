//! Observability metrics: query latency and write throughput.

use std::collections::VecDeque;
use std::time::Duration;

/// Latency samples kept for the average and percentiles. Older ones are dropped.
pub const MAX_LATENCY_SAMPLES: usize = 10_000;

/// Collects runtime metrics for a collection store.
#[derive(Debug)]
pub struct MetricsCollector {
    /// The most recent query latencies, oldest first.
    query_latencies_us: VecDeque<f64>,
    total_queries: u64,
    total_inserts: u64,
    total_updates: u64,
    total_deletes: u64,
    total_compensations: u64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            query_latencies_us: VecDeque::with_capacity(MAX_LATENCY_SAMPLES),
            total_queries: 0,
            total_inserts: 0,
            total_updates: 0,
            total_deletes: 0,
            total_compensations: 0,
        }
    }

    /// Record a nearest-neighbor query with its duration.
    pub fn record_query(&mut self, duration: Duration) {
        self.total_queries += 1;
        if self.query_latencies_us.len() == MAX_LATENCY_SAMPLES {
            self.query_latencies_us.pop_front();
        }
        self.query_latencies_us.push_back(duration.as_micros() as f64);
    }

    /// Number of latency samples currently held.
    pub fn latency_samples(&self) -> usize {
        self.query_latencies_us.len()
    }

    pub fn record_inserts(&mut self, count: usize) {
        self.total_inserts += count as u64;
    }

    pub fn record_update(&mut self) {
        self.total_updates += 1;
    }

    pub fn record_deletes(&mut self, count: usize) {
        self.total_deletes += count as u64;
    }

    /// A relational write failed and the index change was undone.
    pub fn record_compensation(&mut self) {
        self.total_compensations += 1;
    }

    pub fn total_queries(&self) -> u64 {
        self.total_queries
    }

    pub fn total_inserts(&self) -> u64 {
        self.total_inserts
    }

    pub fn total_updates(&self) -> u64 {
        self.total_updates
    }

    pub fn total_deletes(&self) -> u64 {
        self.total_deletes
    }

    pub fn total_compensations(&self) -> u64 {
        self.total_compensations
    }

    /// Average latency of the retained queries, in microseconds.
    pub fn avg_query_latency_us(&self) -> f64 {
        if self.query_latencies_us.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.query_latencies_us.iter().sum();
        sum / self.query_latencies_us.len() as f64
    }

    /// Get a percentile of query latency (e.g., 50.0, 95.0, 99.0).
    pub fn percentile_query_latency_us(&self, percentile: f64) -> f64 {
        if self.query_latencies_us.is_empty() {
            return 0.0;
        }

        let mut sorted: Vec<f64> = self.query_latencies_us.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let index = ((percentile / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        sorted[index.min(sorted.len() - 1)]
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_queries: self.total_queries,
            total_inserts: self.total_inserts,
            total_updates: self.total_updates,
            total_deletes: self.total_deletes,
            total_compensations: self.total_compensations,
            avg_query_latency_us: self.avg_query_latency_us(),
            p50_query_latency_us: self.percentile_query_latency_us(50.0),
            p99_query_latency_us: self.percentile_query_latency_us(99.0),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters, as reported by `CollectionStore::stats`.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub total_queries: u64,
    pub total_inserts: u64,
    pub total_updates: u64,
    pub total_deletes: u64,
    pub total_compensations: u64,
    pub avg_query_latency_us: f64,
    pub p50_query_latency_us: f64,
    pub p99_query_latency_us: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_metrics_basic() {
        let mut m = MetricsCollector::new();
        m.record_inserts(2);
        m.record_update();
        m.record_deletes(1);
        m.record_compensation();

        assert_eq!(m.total_inserts(), 2);
        assert_eq!(m.total_updates(), 1);
        assert_eq!(m.total_deletes(), 1);
        assert_eq!(m.total_compensations(), 1);
        assert_eq!(m.total_queries(), 0);
    }

    #[test]
    fn test_metrics_latency() {
        let mut m = MetricsCollector::new();
        m.record_query(Duration::from_micros(100));
        m.record_query(Duration::from_micros(200));
        m.record_query(Duration::from_micros(300));

        assert_eq!(m.total_queries(), 3);
        assert_abs_diff_eq!(m.avg_query_latency_us(), 200.0, epsilon = 1.0);
        assert_abs_diff_eq!(m.percentile_query_latency_us(50.0), 200.0, epsilon = 1.0);

        let snap = m.snapshot();
        assert_eq!(snap.total_queries, 3);
        assert_abs_diff_eq!(snap.p99_query_latency_us, 300.0, epsilon = 1.0);
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let mut m = MetricsCollector::new();
        for i in 0..MAX_LATENCY_SAMPLES + 500 {
            m.record_query(Duration::from_micros(i as u64));
        }

        assert_eq!(m.total_queries(), (MAX_LATENCY_SAMPLES + 500) as u64);
        assert_eq!(m.latency_samples(), MAX_LATENCY_SAMPLES);
        // The first 500 samples were evicted
        assert_abs_diff_eq!(m.percentile_query_latency_us(0.0), 500.0, epsilon = 0.5);
    }

    #[test]
    fn test_metrics_empty() {
        let m = MetricsCollector::new();
        assert_eq!(m.avg_query_latency_us(), 0.0);
        assert_eq!(m.percentile_query_latency_us(99.0), 0.0);
    }
}
