//! Step-wise escalation across user counts and models.

use std::sync::Arc;
use std::time::Duration;

use loadgen_backend::InferenceBackend;
use loadgen_common::config::LoadConfig;
use loadgen_common::{LoadError, Result};
use loadgen_obs::ResourceMonitor;

use crate::aggregate::{aggregate, StepResult};
use crate::shutdown::Shutdown;
use crate::step::{StepController, StepPlan, StepTiming};
use crate::worker::PauseBounds;

/// `step_size, 2*step_size, ...` up to `max_users`, with `max_users` appended
/// when the sequence does not land on it. A zero step tests `max_users` only.
pub fn user_steps(max_users: usize, step_size: usize) -> Vec<usize> {
    if max_users == 0 {
        return Vec::new();
    }
    if step_size == 0 {
        return vec![max_users];
    }
    let mut steps: Vec<usize> = (step_size..=max_users).step_by(step_size).collect();
    if steps.last() != Some(&max_users) {
        steps.push(max_users);
    }
    steps
}

#[derive(Debug, Clone)]
pub struct EscalationPlan {
    pub models: Vec<String>,
    pub max_users: usize,
    pub step_size: usize,
    pub pause: PauseBounds,
    pub step_duration: Duration,
    pub gpu_label: String,
}

impl EscalationPlan {
    pub fn steps(&self) -> Vec<usize> { user_steps(self.max_users, self.step_size) }

    pub fn total_steps(&self) -> usize { self.steps().len() * self.models.len() }
}

/// Results collected so far. `interrupted` is set when the run stopped early
/// on a shutdown signal.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub results: Vec<StepResult>,
    pub interrupted: bool,
}

pub struct EscalationLoop {
    backend: Arc<dyn InferenceBackend>,
    controller: StepController,
    settle: Duration,
}

impl EscalationLoop {
    pub fn new(backend: Arc<dyn InferenceBackend>, monitor: ResourceMonitor, cfg: &LoadConfig) -> Self {
        let controller = StepController::new(backend.clone(), monitor, StepTiming::from(cfg));
        Self { backend, controller, settle: cfg.settle() }
    }

    pub async fn run(&mut self, plan: &EscalationPlan, prompts: Arc<[String]>, shutdown: &Shutdown) -> Result<RunReport> {
        let endpoint = self.backend.endpoint();
        tracing::info!(target: "escalation", "checking inference server at {}", endpoint);
        if !self.backend.health_check().await {
            return Err(LoadError::Unreachable(endpoint));
        }

        let steps = plan.steps();
        let total = plan.total_steps();
        tracing::info!(
            target: "escalation",
            "planned steps {:?} for {} model(s), estimated {:.1} min",
            steps,
            plan.models.len(),
            total as f64 * plan.step_duration.as_secs_f64() / 60.0
        );

        let mut report = RunReport::default();
        let mut counter = 0;
        for model in &plan.models {
            tracing::info!(target: "escalation", "testing model {}", model);
            for &users in &steps {
                counter += 1;
                if shutdown.is_triggered() {
                    report.interrupted = true;
                    return Ok(report);
                }
                tracing::info!(target: "escalation", "[step {}/{}] {} users with {}", counter, total, users, model);

                let step = StepPlan { model: model.clone(), user_count: users, pause: plan.pause, duration: plan.step_duration };
                let outcome = match self.controller.run(&step, prompts.clone(), shutdown).await {
                    Ok(outcome) => outcome,
                    Err(LoadError::Interrupted) => {
                        report.interrupted = true;
                        return Ok(report);
                    }
                    Err(e) => return Err(e),
                };

                match aggregate(&outcome, users, model, &plan.gpu_label) {
                    Some(result) => {
                        tracing::info!(
                            target: "escalation",
                            "step done: {} ok, {} failed, avg {:.2}s, ttft {:.2}s, max {:.2}s, errors {:.1}%, cpu {:.1}% -> {}",
                            result.successful_requests,
                            result.failed_requests,
                            result.avg_latency,
                            result.avg_ttft,
                            result.max_latency,
                            result.error_rate,
                            result.cpu_percent,
                            result.recommendation
                        );
                        report.results.push(result);
                    }
                    None => tracing::warn!(target: "escalation", "no successful requests with {} users", users),
                }

                if counter < total {
                    tracing::info!(target: "escalation", "settling for {}s", self.settle.as_secs());
                    tokio::select! {
                        _ = tokio::time::sleep(self.settle) => {}
                        _ = shutdown.wait() => {
                            report.interrupted = true;
                            return Ok(report);
                        }
                    }
                }
            }
        }
        Ok(report)
    }
}
