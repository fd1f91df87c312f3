//! One simulated user.

use std::sync::Arc;
use std::time::Duration;

use loadgen_backend::{FailureKind, InferenceBackend, RequestOutcome};
use loadgen_common::{LoadError, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;

use crate::store::MetricsStore;

/// Think-time range between two requests of the same user.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PauseBounds {
    min: Duration,
    max: Duration,
}

impl PauseBounds {
    pub fn from_secs(min: f64, max: f64) -> Result<Self> {
        if !(min.is_finite() && max.is_finite()) || min < 0.0 {
            return Err(LoadError::InvalidArgument(format!("pause bounds must be non-negative, got {}..{}", min, max)));
        }
        if min > max {
            return Err(LoadError::InvalidArgument(format!("pause-min ({}) must not exceed pause-max ({})", min, max)));
        }
        let secs = |v: f64| {
            Duration::try_from_secs_f64(v)
                .map_err(|_| LoadError::InvalidArgument(format!("pause of {}s is out of range", v)))
        };
        Ok(Self { min: secs(min)?, max: secs(max)? })
    }

    pub fn min(&self) -> Duration { self.min }
    pub fn max(&self) -> Duration { self.max }

    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        Duration::from_secs_f64(rng.gen_range(self.min.as_secs_f64()..=self.max.as_secs_f64()))
    }
}

pub struct UserSimulator {
    pub id: usize,
    pub model: Arc<str>,
    pub prompts: Arc<[String]>,
    pub pause: PauseBounds,
    pub duration: Duration,
    /// Wait before the first request; the deadline is taken after it.
    pub start_delay: Duration,
    pub request_timeout: Duration,
}

impl UserSimulator {
    /// Issues requests until the deadline and returns how many were made.
    pub async fn run(self, backend: Arc<dyn InferenceBackend>, store: Arc<MetricsStore>) -> u64 {
        tokio::time::sleep(self.start_delay).await;
        let Some(deadline) = Instant::now().checked_add(self.duration) else {
            tracing::warn!(target: "worker", user = self.id, "step duration {:?} is out of range", self.duration);
            return 0;
        };
        let mut rng = StdRng::from_entropy();
        let mut issued = 0;

        while Instant::now() < deadline {
            let Some(prompt) = self.prompts.choose(&mut rng) else { break };
            let outcome = match tokio::time::timeout(self.request_timeout, backend.generate(&self.model, prompt)).await {
                Ok(outcome) => outcome,
                Err(_) => RequestOutcome::failure(FailureKind::Timeout),
            };
            store.record(&outcome);
            issued += 1;

            match outcome {
                RequestOutcome::Success { total_latency, ttft } => tracing::debug!(
                    target: "worker",
                    user = self.id,
                    "✓ {:.2}s (ttft {:.2}s) {}",
                    total_latency.as_secs_f64(),
                    ttft.as_secs_f64(),
                    preview(prompt)
                ),
                RequestOutcome::Failure { kind } => tracing::debug!(target: "worker", user = self.id, "✗ {}", kind),
            }

            let now = Instant::now();
            if now < deadline {
                let pause = self.pause.draw(&mut rng).min(deadline - now);
                tokio::time::sleep(pause).await;
            }
        }
        issued
    }
}

fn preview(prompt: &str) -> String {
    let mut p: String = prompt.chars().take(30).collect();
    if p.len() < prompt.len() {
        p.push_str("...");
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadgen_backend::mock::{MockBackend, MockReply};

    fn sim(duration: Duration, pause: PauseBounds) -> UserSimulator {
        UserSimulator {
            id: 0,
            model: Arc::from("llama3"),
            prompts: Arc::from(vec!["a".to_string(), "b".to_string()]),
            pause,
            duration,
            start_delay: Duration::ZERO,
            request_timeout: Duration::from_secs(120),
        }
    }

    #[test]
    fn pause_bounds_validate_order() {
        assert!(PauseBounds::from_secs(3.0, 30.0).is_ok());
        assert!(PauseBounds::from_secs(5.0, 5.0).is_ok());
        assert!(matches!(PauseBounds::from_secs(31.0, 30.0), Err(LoadError::InvalidArgument(_))));
        assert!(PauseBounds::from_secs(-1.0, 1.0).is_err());
    }

    #[test]
    fn pause_bounds_reject_out_of_range_values() {
        assert!(matches!(PauseBounds::from_secs(3.0, 1e20), Err(LoadError::InvalidArgument(_))));
        assert!(matches!(PauseBounds::from_secs(1e20, 1e20), Err(LoadError::InvalidArgument(_))));
        assert!(PauseBounds::from_secs(3.0, f64::INFINITY).is_err());
        assert!(PauseBounds::from_secs(f64::NAN, 1.0).is_err());
    }

    #[test]
    fn pause_draw_stays_in_bounds() {
        let bounds = PauseBounds::from_secs(0.5, 1.5).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let d = bounds.draw(&mut rng);
            assert!(d >= bounds.min() && d <= bounds.max());
        }
        let fixed = PauseBounds::from_secs(2.0, 2.0).unwrap();
        assert_eq!(fixed.draw(&mut rng), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn loops_until_deadline_and_truncates_last_pause() {
        let backend = Arc::new(MockBackend::scripted(vec![MockReply::success(Duration::from_secs(1), Duration::from_millis(200))]));
        let store = MetricsStore::new();
        let start = Instant::now();
        // 1s request + 3s pause: requests start at 0, 4, 8; the pause after the
        // third is cut to the deadline at 10s.
        let issued = sim(Duration::from_secs(10), PauseBounds::from_secs(3.0, 3.0).unwrap())
            .run(backend.clone(), store.clone())
            .await;
        assert_eq!(issued, 3);
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        let snap = store.snapshot();
        assert_eq!(snap.success_count, 3);
        assert_eq!(snap.ttfts, vec![Duration::from_millis(200); 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_counted_once_without_retry() {
        let backend = Arc::new(MockBackend::scripted(vec![
            MockReply::failure(Duration::from_millis(500), FailureKind::Connection),
            MockReply::success(Duration::from_millis(500), Duration::from_millis(100)),
        ]));
        let store = MetricsStore::new();
        let issued = sim(Duration::from_secs(4), PauseBounds::from_secs(0.5, 0.5).unwrap())
            .run(backend.clone(), store.clone())
            .await;
        assert_eq!(issued, 4);
        assert_eq!(backend.calls(), 4);
        assert_eq!(store.counts(), (2, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_request_is_recorded_as_timeout() {
        let backend = Arc::new(MockBackend::scripted(vec![MockReply::success(Duration::from_secs(600), Duration::from_secs(1))]));
        let store = MetricsStore::new();
        let mut user = sim(Duration::from_secs(1), PauseBounds::from_secs(0.0, 0.0).unwrap());
        user.request_timeout = Duration::from_secs(120);
        let issued = user.run(backend, store.clone()).await;
        assert_eq!(issued, 1);
        assert_eq!(store.counts(), (0, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_duration_issues_nothing() {
        let backend = Arc::new(MockBackend::new());
        let store = MetricsStore::new();
        let issued = sim(Duration::MAX, PauseBounds::from_secs(0.0, 0.0).unwrap()).run(backend.clone(), store.clone()).await;
        assert_eq!(issued, 0);
        assert_eq!(backend.calls(), 0);
    }

    #[test]
    fn preview_truncates_long_prompts() {
        assert_eq!(preview("short"), "short");
        assert_eq!(preview(&"x".repeat(40)), format!("{}...", "x".repeat(30)));
    }
}
