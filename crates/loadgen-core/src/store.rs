use std::sync::{Arc, Mutex};
use std::time::Duration;

use loadgen_backend::RequestOutcome;

/// Consistent copy of a step's counters and sequences.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub success_count: u64,
    pub failure_count: u64,
    pub latencies: Vec<Duration>,
    pub ttfts: Vec<Duration>,
}

impl MetricsSnapshot {
    pub fn total(&self) -> u64 { self.success_count + self.failure_count }

    /// Failures as a percentage of all requests; 0 when nothing was observed.
    pub fn error_rate(&self) -> f64 { error_rate(self.success_count, self.failure_count) }
}

pub(crate) fn error_rate(success: u64, failure: u64) -> f64 {
    let total = success + failure;
    if total == 0 { 0.0 } else { failure as f64 / total as f64 * 100.0 }
}

/// Shared by every worker of a step. Counts and sequences live behind one
/// lock so a reader never sees a success without its latency.
#[derive(Debug, Default)]
pub struct MetricsStore {
    inner: Mutex<MetricsSnapshot>,
}

impl MetricsStore {
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    pub fn record_success(&self, latency: Duration, ttft: Duration) {
        let mut g = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        g.success_count += 1;
        g.latencies.push(latency);
        g.ttfts.push(ttft);
    }

    pub fn record_failure(&self) {
        let mut g = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        g.failure_count += 1;
    }

    pub fn record(&self, outcome: &RequestOutcome) {
        match *outcome {
            RequestOutcome::Success { total_latency, ttft } => self.record_success(total_latency, ttft),
            RequestOutcome::Failure { .. } => self.record_failure(),
        }
    }

    /// (success_count, failure_count) without copying the sequences.
    pub fn counts(&self) -> (u64, u64) {
        let g = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        (g.success_count, g.failure_count)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Only called between steps, while no worker holds the store.
    pub fn reset(&self) {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner()) = MetricsSnapshot::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadgen_backend::FailureKind;

    #[test]
    fn concurrent_records_keep_counts_and_sequences_aligned() {
        let store = MetricsStore::new();
        std::thread::scope(|s| {
            for t in 0..8u64 {
                let store = store.clone();
                s.spawn(move || {
                    for i in 0..500u64 {
                        if (i + t) % 4 == 0 {
                            store.record(&RequestOutcome::failure(FailureKind::Timeout));
                        } else {
                            store.record_success(Duration::from_millis(100 + i), Duration::from_millis(10));
                        }
                    }
                });
            }
        });
        let snap = store.snapshot();
        assert_eq!(snap.total(), 4000);
        assert_eq!(snap.failure_count, 1000);
        assert_eq!(snap.latencies.len() as u64, snap.success_count);
        assert_eq!(snap.ttfts.len() as u64, snap.success_count);
        assert!((snap.error_rate() - 25.0).abs() < 1e-9);
        assert_eq!(store.counts(), (3000, 1000));
    }

    #[test]
    fn reset_clears_everything() {
        let store = MetricsStore::new();
        store.record_success(Duration::from_secs(1), Duration::from_millis(200));
        store.record_failure();
        store.reset();
        assert_eq!(store.snapshot(), MetricsSnapshot::default());
        assert_eq!(store.snapshot().error_rate(), 0.0);
    }
}
