//! Runtime counters: ingest/remove/query throughput, rebuild outcomes,
//! and a rolling window of query latencies.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Number of most recent query latencies kept for percentiles.
const LATENCY_WINDOW: usize = 4096;

/// Point-in-time copy of [`EngineStats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub total_ingests: u64,
    pub total_removes: u64,
    pub total_queries: u64,
    pub rebuild_successes: u64,
    pub rebuild_failures: u64,
    pub last_rebuild_records: u64,
    pub avg_query_latency_us: f64,
    pub p50_query_latency_us: f64,
    pub p95_query_latency_us: f64,
    pub p99_query_latency_us: f64,
}

/// Lock-free counters shared by every component of an engine.
#[derive(Debug, Default)]
pub struct EngineStats {
    total_ingests: AtomicU64,
    total_removes: AtomicU64,
    total_queries: AtomicU64,
    rebuild_successes: AtomicU64,
    rebuild_failures: AtomicU64,
    last_rebuild_records: AtomicU64,
    query_latencies_us: Mutex<VecDeque<f64>>,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_ingest(&self) {
        self.total_ingests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_remove(&self) {
        self.total_removes.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a query with its duration.
    pub fn record_query(&self, duration: Duration) {
        self.total_queries.fetch_add(1, Ordering::Relaxed);
        let mut window = self.query_latencies_us.lock();
        if window.len() == LATENCY_WINDOW {
            window.pop_front();
        }
        window.push_back(duration.as_micros() as f64);
    }

    pub fn record_rebuild_success(&self, records: usize) {
        self.rebuild_successes.fetch_add(1, Ordering::Relaxed);
        self.last_rebuild_records
            .store(records as u64, Ordering::Relaxed);
    }

    pub fn record_rebuild_failure(&self) {
        self.rebuild_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let mut sorted: Vec<f64> = self.query_latencies_us.lock().iter().copied().collect();
        sorted.sort_by(f64::total_cmp);

        StatsSnapshot {
            total_ingests: self.total_ingests.load(Ordering::Relaxed),
            total_removes: self.total_removes.load(Ordering::Relaxed),
            total_queries: self.total_queries.load(Ordering::Relaxed),
            rebuild_successes: self.rebuild_successes.load(Ordering::Relaxed),
            rebuild_failures: self.rebuild_failures.load(Ordering::Relaxed),
            last_rebuild_records: self.last_rebuild_records.load(Ordering::Relaxed),
            avg_query_latency_us: average(&sorted),
            p50_query_latency_us: percentile(&sorted, 50.0),
            p95_query_latency_us: percentile(&sorted, 95.0),
            p99_query_latency_us: percentile(&sorted, 99.0),
        }
    }
}

fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Nearest-rank percentile over an ascending slice (e.g. 50.0, 95.0, 99.0).
fn percentile(sorted: &[f64], percentile: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let index = ((percentile / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted[index.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = EngineStats::new();
        stats.record_ingest();
        stats.record_ingest();
        stats.record_remove();
        stats.record_rebuild_success(42);
        stats.record_rebuild_failure();

        let snap = stats.snapshot();
        assert_eq!(snap.total_ingests, 2);
        assert_eq!(snap.total_removes, 1);
        assert_eq!(snap.total_queries, 0);
        assert_eq!(snap.rebuild_successes, 1);
        assert_eq!(snap.rebuild_failures, 1);
        assert_eq!(snap.last_rebuild_records, 42);
    }

    #[test]
    fn test_latency_percentiles() {
        let stats = EngineStats::new();
        stats.record_query(Duration::from_micros(300));
        stats.record_query(Duration::from_micros(100));
        stats.record_query(Duration::from_micros(200));

        let snap = stats.snapshot();
        assert_eq!(snap.total_queries, 3);
        assert!((snap.avg_query_latency_us - 200.0).abs() < 1.0);
        assert!((snap.p50_query_latency_us - 200.0).abs() < 1.0);
        assert!((snap.p99_query_latency_us - 300.0).abs() < 1.0);
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let stats = EngineStats::new();
        for _ in 0..LATENCY_WINDOW + 10 {
            stats.record_query(Duration::from_micros(5));
        }
        assert_eq!(stats.query_latencies_us.lock().len(), LATENCY_WINDOW);
        assert_eq!(stats.snapshot().total_queries, (LATENCY_WINDOW + 10) as u64);
    }

    #[test]
    fn test_empty_latencies() {
        let snap = EngineStats::new().snapshot();
        assert_eq!(snap.avg_query_latency_us, 0.0);
        assert_eq!(snap.p99_query_latency_us, 0.0);
    }
}
