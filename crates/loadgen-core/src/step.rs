//! Runs one fixed-size pool of users for one step.

use std::sync::Arc;
use std::time::Duration;

use loadgen_backend::InferenceBackend;
use loadgen_common::config::LoadConfig;
use loadgen_common::{LoadError, Result};
use loadgen_obs::ResourceMonitor;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::shutdown::Shutdown;
use crate::store::{error_rate, MetricsSnapshot, MetricsStore};
use crate::worker::{PauseBounds, UserSimulator};

#[derive(Debug, Clone, Copy)]
pub struct StepTiming {
    pub stagger: Duration,
    pub check_interval: Duration,
    /// Percent; the step aborts when the error rate is strictly above it.
    pub abort_error_rate: f64,
    pub abort_min_requests: u64,
    pub request_timeout: Duration,
}

impl Default for StepTiming {
    fn default() -> Self { Self::from(&LoadConfig::default()) }
}

impl From<&LoadConfig> for StepTiming {
    fn from(cfg: &LoadConfig) -> Self {
        Self {
            stagger: cfg.stagger(),
            check_interval: cfg.check_interval(),
            abort_error_rate: cfg.abort_error_rate,
            abort_min_requests: cfg.abort_min_requests,
            request_timeout: cfg.request_timeout(),
        }
    }
}

/// Abort rule evaluated at each check boundary.
pub fn should_abort(success: u64, failure: u64, timing: &StepTiming) -> bool {
    let total = success + failure;
    total >= timing.abort_min_requests && error_rate(success, failure) > timing.abort_error_rate
}

#[derive(Debug, Clone)]
pub struct StepPlan {
    pub model: String,
    pub user_count: usize,
    pub pause: PauseBounds,
    pub duration: Duration,
}

/// Everything the aggregator needs from a finished (or aborted) step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub snapshot: MetricsSnapshot,
    pub avg_cpu: f64,
    pub avg_memory: f64,
    pub wall_time: Duration,
    pub aborted: bool,
}

pub struct StepController {
    backend: Arc<dyn InferenceBackend>,
    store: Arc<MetricsStore>,
    monitor: ResourceMonitor,
    timing: StepTiming,
}

impl StepController {
    pub fn new(backend: Arc<dyn InferenceBackend>, monitor: ResourceMonitor, timing: StepTiming) -> Self {
        Self { backend, store: MetricsStore::new(), monitor, timing }
    }

    pub fn store(&self) -> &Arc<MetricsStore> { &self.store }

    /// Runs the step to completion or abort. Returns `LoadError::Interrupted`
    /// once `shutdown` fires; every worker has been torn down by then.
    pub async fn run(&mut self, plan: &StepPlan, prompts: Arc<[String]>, shutdown: &Shutdown) -> Result<StepOutcome> {
        self.store.reset();
        self.monitor.start();
        let started = Instant::now();
        tracing::info!(
            target: "step",
            "starting step: {} users, model {}, {:.1} min",
            plan.user_count,
            plan.model,
            plan.duration.as_secs_f64() / 60.0
        );

        let model: Arc<str> = Arc::from(plan.model.as_str());
        let mut workers = JoinSet::new();
        for id in 0..plan.user_count {
            let user = UserSimulator {
                id,
                model: model.clone(),
                prompts: prompts.clone(),
                pause: plan.pause,
                duration: plan.duration,
                start_delay: self.timing.stagger.saturating_mul(id as u32),
                request_timeout: self.timing.request_timeout,
            };
            workers.spawn(user.run(self.backend.clone(), self.store.clone()));
        }

        let check_every = self.timing.check_interval.max(Duration::from_millis(1));
        let mut checks = tokio::time::interval_at(started + check_every, check_every);
        let mut aborted = false;
        let mut interrupted = false;
        loop {
            tokio::select! {
                joined = workers.join_next() => match joined {
                    Some(Ok(issued)) => tracing::trace!(target: "step", "user finished after {} requests", issued),
                    Some(Err(e)) if e.is_panic() => tracing::error!(target: "step", "user task panicked: {}", e),
                    Some(Err(_)) => {}
                    None => break,
                },
                _ = checks.tick() => {
                    let (success, failure) = self.store.counts();
                    let total = success + failure;
                    if total >= self.timing.abort_min_requests {
                        tracing::info!(
                            target: "step",
                            "progress: {} requests, error rate {:.1}%",
                            total,
                            error_rate(success, failure)
                        );
                    }
                    if should_abort(success, failure, &self.timing) {
                        tracing::warn!(
                            target: "step",
                            "aborting step: error rate {:.1}% exceeds {:.0}%, server is overloaded",
                            error_rate(success, failure),
                            self.timing.abort_error_rate
                        );
                        aborted = true;
                        break;
                    }
                }
                _ = shutdown.wait() => {
                    tracing::warn!(target: "step", "interrupt received, stopping {} users", workers.len());
                    interrupted = true;
                    break;
                }
            }
        }

        workers.abort_all();
        while workers.join_next().await.is_some() {}
        self.monitor.stop().await;
        tracing::debug!(
            target: "step",
            "step ended after {:.1}s, {} resource samples",
            started.elapsed().as_secs_f64(),
            self.monitor.sample_count()
        );

        if interrupted {
            return Err(LoadError::Interrupted);
        }
        Ok(StepOutcome {
            snapshot: self.store.snapshot(),
            avg_cpu: self.monitor.average_cpu(),
            avg_memory: self.monitor.average_memory(),
            wall_time: started.elapsed(),
            aborted,
        })
    }
}
