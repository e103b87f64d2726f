//! Request load accounting: atomic counters plus a sliding latency
//! window.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

/// Sliding window for the latency average.
const LATENCY_WINDOW: Duration = Duration::from_secs(60);

/// Load snapshot reported on `/api/load` and in WS heartbeats.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSnapshot {
    /// Requests currently in flight.
    pub active_requests: i64,
    /// Requests accepted since startup.
    pub total_requests: u64,
    /// Average latency over the last 60 seconds.
    pub avg_latency_ms: u64,
}

struct LatencyEntry {
    at: Instant,
    latency_ms: u64,
}

/// Node-wide request counters. Counter mutations are atomic adds; only
/// the latency window takes a lock.
pub struct LoadStats {
    active: AtomicI64,
    total: AtomicU64,
    window: Mutex<VecDeque<LatencyEntry>>,
}

impl LoadStats {
    /// Create zeroed stats.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            active: AtomicI64::new(0),
            total: AtomicU64::new(0),
            window: Mutex::new(VecDeque::with_capacity(128)),
        })
    }

    /// Mark a request as started. Dropping the guard marks it finished
    /// and records its latency, whatever the outcome.
    pub fn begin(self: &Arc<Self>) -> RequestGuard {
        self.active.fetch_add(1, Ordering::Relaxed);
        RequestGuard {
            stats: self.clone(),
            started: Instant::now(),
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> LoadSnapshot {
        LoadSnapshot {
            active_requests: self.active.load(Ordering::Relaxed),
            total_requests: self.total.load(Ordering::Relaxed),
            avg_latency_ms: self.avg_latency_ms(),
        }
    }

    fn record(&self, latency_ms: u64) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
        let mut window = self.window.lock();
        window.push_back(LatencyEntry {
            at: Instant::now(),
            latency_ms,
        });
    }

    fn avg_latency_ms(&self) -> u64 {
        let mut window = self.window.lock();
        if let Some(cutoff) = Instant::now().checked_sub(LATENCY_WINDOW) {
            while window.front().is_some_and(|e| e.at < cutoff) {
                window.pop_front();
            }
        }
        if window.is_empty() {
            return 0;
        }
        let total: u64 = window.iter().map(|e| e.latency_ms).sum();
        total / window.len() as u64
    }
}

/// In-flight request marker. Finishes the request on drop.
pub struct RequestGuard {
    stats: Arc<LoadStats>,
    started: Instant,
}

impl RequestGuard {
    /// Elapsed time since the request started.
    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.stats.record(self.elapsed_ms());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_counts_active_then_total() {
        let stats = LoadStats::new();
        {
            let _guard = stats.begin();
            let snap = stats.snapshot();
            assert_eq!(snap.active_requests, 1);
            assert_eq!(snap.total_requests, 0);
        }
        let snap = stats.snapshot();
        assert_eq!(snap.active_requests, 0);
        assert_eq!(snap.total_requests, 1);
    }

    #[test]
    fn total_increments_once_per_request() {
        let stats = LoadStats::new();
        for _ in 0..5 {
            let _guard = stats.begin();
        }
        assert_eq!(stats.snapshot().total_requests, 5);
    }

    #[test]
    fn average_covers_recorded_latencies() {
        let stats = LoadStats::new();
        stats.record(10);
        stats.record(30);
        // record() also decrements active; rebalance for the assertion.
        stats.active.store(0, Ordering::Relaxed);
        assert_eq!(stats.snapshot().avg_latency_ms, 20);
    }

    #[test]
    fn empty_window_averages_zero() {
        let stats = LoadStats::new();
        assert_eq!(stats.snapshot().avg_latency_ms, 0);
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let stats = LoadStats::new();
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert!(json.get("activeRequests").is_some());
        assert!(json.get("totalRequests").is_some());
        assert!(json.get("avgLatencyMs").is_some());
    }
}
