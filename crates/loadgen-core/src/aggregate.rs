//! Turns a finished step into a summary row with a recommendation.

use std::fmt;
use std::time::Duration;

use crate::step::StepOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recommendation {
    Critical,
    Overloaded,
    Unstable,
    Unacceptable,
    VerySlow,
    Slow,
    Acceptable,
    Good,
    Optimal,
}

#[derive(Debug, Clone, Copy)]
enum Metric {
    ErrorRate,
    AvgTtft,
}

/// Checked top to bottom; the first threshold exceeded wins. Error rate
/// entries come first so they dominate TTFT.
const TIERS: [(Metric, f64, Recommendation); 8] = [
    (Metric::ErrorRate, 10.0, Recommendation::Critical),
    (Metric::ErrorRate, 5.0, Recommendation::Overloaded),
    (Metric::ErrorRate, 2.0, Recommendation::Unstable),
    (Metric::AvgTtft, 30.0, Recommendation::Unacceptable),
    (Metric::AvgTtft, 20.0, Recommendation::VerySlow),
    (Metric::AvgTtft, 10.0, Recommendation::Slow),
    (Metric::AvgTtft, 5.0, Recommendation::Acceptable),
    (Metric::AvgTtft, 2.0, Recommendation::Good),
];

impl Recommendation {
    /// `error_rate` in percent, `avg_ttft` in seconds.
    pub fn assess(error_rate: f64, avg_ttft: f64) -> Self {
        TIERS
            .iter()
            .find(|(metric, threshold, _)| match metric {
                Metric::ErrorRate => error_rate > *threshold,
                Metric::AvgTtft => avg_ttft > *threshold,
            })
            .map(|(_, _, tier)| *tier)
            .unwrap_or(Recommendation::Optimal)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Recommendation::Critical => "Critical",
            Recommendation::Overloaded => "Overloaded",
            Recommendation::Unstable => "Unstable",
            Recommendation::Unacceptable => "Unacceptable",
            Recommendation::VerySlow => "Very slow",
            Recommendation::Slow => "Slow",
            Recommendation::Acceptable => "Acceptable",
            Recommendation::Good => "Good",
            Recommendation::Optimal => "Optimal",
        }
    }

    pub fn marker(&self) -> &'static str {
        match self {
            Recommendation::Critical | Recommendation::Overloaded | Recommendation::Unacceptable => "❌",
            Recommendation::Unstable | Recommendation::VerySlow | Recommendation::Slow => "⚠️",
            Recommendation::Acceptable | Recommendation::Good | Recommendation::Optimal => "✅",
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.label()) }
}

/// Summary of one step. Latencies and durations are in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub users: usize,
    pub model: String,
    pub gpu: String,
    pub avg_latency: f64,
    pub min_latency: f64,
    pub max_latency: f64,
    pub avg_ttft: f64,
    pub error_rate: f64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub duration_secs: f64,
    pub recommendation: Recommendation,
    pub aborted_early: bool,
}

fn mean(values: &[Duration]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(Duration::as_secs_f64).sum::<f64>() / values.len() as f64
}

/// `None` when the step had no successful request.
pub fn aggregate(outcome: &StepOutcome, users: usize, model: &str, gpu: &str) -> Option<StepResult> {
    let snap = &outcome.snapshot;
    if snap.success_count == 0 || snap.latencies.is_empty() {
        return None;
    }
    let min_latency = snap.latencies.iter().min().copied().unwrap_or_default();
    let max_latency = snap.latencies.iter().max().copied().unwrap_or_default();
    let avg_ttft = mean(&snap.ttfts);
    let error_rate = snap.error_rate();

    Some(StepResult {
        users,
        model: model.to_string(),
        gpu: gpu.to_string(),
        avg_latency: mean(&snap.latencies),
        min_latency: min_latency.as_secs_f64(),
        max_latency: max_latency.as_secs_f64(),
        avg_ttft,
        error_rate,
        total_requests: snap.total(),
        successful_requests: snap.success_count,
        failed_requests: snap.failure_count,
        cpu_percent: outcome.avg_cpu,
        memory_percent: outcome.avg_memory,
        duration_secs: outcome.wall_time.as_secs_f64(),
        recommendation: Recommendation::assess(error_rate, avg_ttft),
        aborted_early: outcome.aborted,
    })
}
