use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use loadgen_backend::ollama::base_url_from_host;
use loadgen_backend::{InferenceBackend, OllamaBackend};
use loadgen_common::config::LoadConfig;
use loadgen_common::{LoadError, Result};
use loadgen_core::{EscalationLoop, EscalationPlan, PauseBounds, Shutdown};
use loadgen_obs::{ResourceMonitor, Sampler, SysinfoSampler};
use opentelemetry_otlp::WithExportConfig;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod prompts;
mod report;

#[derive(Parser, Debug)]
#[command(name = "loadgen", version, about = "Stepwise concurrent-user load testing for Ollama-compatible servers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Escalate simulated users step by step and report each step
    Run(RunArgs),
    /// Only check that the server answers on /api/tags
    Check(CheckArgs),
    /// Print current host CPU and memory usage
    Stats,
    Version,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Prompt file, one prompt per line
    #[arg(long)]
    prompts: PathBuf,
    /// Maximum number of users, reached in steps
    #[arg(long)]
    users: usize,
    /// Model name(s), comma separated
    #[arg(long)]
    model: String,
    /// GPU label for the report
    #[arg(long, default_value = "Unknown")]
    gpu: String,
    /// Minimum pause between requests of one user, seconds
    #[arg(long, default_value_t = 3.0)]
    pause_min: f64,
    /// Maximum pause between requests of one user, seconds
    #[arg(long, default_value_t = 30.0)]
    pause_max: f64,
    #[arg(long, default_value_t = 5)]
    step_size: usize,
    /// Duration of each step, seconds
    #[arg(long, default_value_t = 300)]
    test_duration: u64,
    #[arg(long, default_value = "127.0.0.1:11434")]
    host: String,
    /// CSV output path; generated from models and time when omitted
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct CheckArgs {
    #[arg(long, default_value = "127.0.0.1:11434")]
    host: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run_load(args).await,
        Commands::Check(args) => check(args).await,
        Commands::Stats => stats().await,
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn parse_models(list: &str) -> Vec<String> {
    list.split(',').map(str::trim).filter(|m| !m.is_empty()).map(String::from).collect()
}

impl RunArgs {
    fn plan(&self) -> Result<EscalationPlan> {
        let models = parse_models(&self.model);
        if models.is_empty() {
            return Err(LoadError::InvalidArgument("no valid model given".into()));
        }
        let pause = PauseBounds::from_secs(self.pause_min, self.pause_max)?;
        if self.users == 0 || self.step_size == 0 {
            return Err(LoadError::InvalidArgument("users and step-size must be greater than 0".into()));
        }
        let step_duration = Duration::from_secs(self.test_duration);
        if std::time::Instant::now().checked_add(step_duration).is_none() {
            return Err(LoadError::InvalidArgument(format!("test-duration of {}s is out of range", self.test_duration)));
        }
        Ok(EscalationPlan {
            models,
            max_users: self.users,
            step_size: self.step_size,
            pause,
            step_duration,
            gpu_label: self.gpu.clone(),
        })
    }
}

async fn run_load(args: RunArgs) -> anyhow::Result<()> {
    let plan = args.plan()?;
    let prompts = prompts::load_prompts(&args.prompts)
        .with_context(|| format!("loading prompts from {}", args.prompts.display()))?;
    tracing::info!("loaded {} prompts from {}", prompts.len(), args.prompts.display());

    let cfg = LoadConfig::load();
    let base_url = base_url_from_host(&args.host);
    let backend = Arc::new(OllamaBackend::new(base_url, &cfg)?);
    tracing::info!(
        "models {}, gpu {}, up to {} users in steps of {}, {:.1} min per step, pauses {}-{}s, host {}",
        plan.models.join(", "),
        plan.gpu_label,
        plan.max_users,
        plan.step_size,
        plan.step_duration.as_secs_f64() / 60.0,
        args.pause_min,
        args.pause_max,
        backend.base_url()
    );

    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if trigger.is_triggered() {
                tracing::error!("second interrupt, exiting without teardown");
                std::process::exit(130);
            }
            tracing::warn!("interrupt received, stopping load test (press Ctrl-C again to force exit)");
            trigger.trigger();
        }
    });

    let monitor = ResourceMonitor::new(cfg.sample_interval());
    let mut escalation = EscalationLoop::new(backend, monitor, &cfg);
    let report = match escalation.run(&plan, prompts, &shutdown).await {
        Ok(report) => report,
        Err(e @ LoadError::Unreachable(_)) => {
            return Err(anyhow::Error::new(e).context("is the server running? try `ollama serve`"))
        }
        Err(e) => return Err(e.into()),
    };

    if report.interrupted {
        tracing::warn!("load test interrupted after {} completed step(s)", report.results.len());
    }
    println!("{}", report::render_table(&report.results));

    let path = match args.output {
        Some(path) => path,
        None => PathBuf::from(report::default_output_name(&plan.models, report::local_now())?),
    };
    report::write_csv(&report.results, &path).with_context(|| format!("writing {}", path.display()))?;
    tracing::info!("results saved to {}", path.display());
    Ok(())
}

async fn check(args: CheckArgs) -> anyhow::Result<()> {
    let cfg = LoadConfig::load();
    let backend = OllamaBackend::new(base_url_from_host(&args.host), &cfg)?;
    if !backend.health_check().await {
        return Err(LoadError::Unreachable(backend.endpoint())).context("is the server running? try `ollama serve`");
    }
    println!("{} is up", backend.endpoint());
    Ok(())
}

async fn stats() -> anyhow::Result<()> {
    let mut sampler = SysinfoSampler::new();
    // CPU usage needs two refreshes some time apart.
    tokio::time::sleep(Duration::from_secs(1)).await;
    match sampler.sample() {
        Some(s) => {
            println!("CPU: {:.1}%", s.cpu_percent);
            println!("Memory: {:.1}%", s.memory_percent);
        }
        None => println!("host statistics unavailable"),
    }
    Ok(())
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );

    if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic().with_endpoint(endpoint))
            .install_simple()
            .ok();
        if let Some(tracer) = tracer {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .with(OpenTelemetryLayer::new(tracer))
                .init();
            return;
        }
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(users: usize, step: usize, pmin: f64, pmax: f64, model: &str) -> RunArgs {
        RunArgs {
            prompts: PathBuf::from("prompts.txt"),
            users,
            model: model.into(),
            gpu: "Unknown".into(),
            pause_min: pmin,
            pause_max: pmax,
            step_size: step,
            test_duration: 300,
            host: "127.0.0.1:11434".into(),
            output: None,
        }
    }

    #[test]
    fn models_are_split_and_trimmed() {
        assert_eq!(parse_models("llama3, mistral:7b,, "), vec!["llama3", "mistral:7b"]);
        assert!(parse_models(" , ").is_empty());
    }

    #[test]
    fn plan_validation() {
        let plan = args(12, 5, 3.0, 30.0, "llama3").plan().unwrap();
        assert_eq!(plan.steps(), vec![5, 10, 12]);
        assert!(args(12, 5, 31.0, 30.0, "llama3").plan().is_err());
        assert!(args(0, 5, 3.0, 30.0, "llama3").plan().is_err());
        assert!(args(12, 0, 3.0, 30.0, "llama3").plan().is_err());
        assert!(args(12, 5, 3.0, 30.0, " ,").plan().is_err());
    }

    #[test]
    fn plan_rejects_out_of_range_durations() {
        assert!(matches!(args(12, 5, 3.0, 1e20, "llama3").plan(), Err(LoadError::InvalidArgument(_))));
        let mut forever = args(12, 5, 3.0, 30.0, "llama3");
        forever.test_duration = u64::MAX;
        assert!(matches!(forever.plan(), Err(LoadError::InvalidArgument(_))));
    }

    #[test]
    fn cli_parses_run_defaults() {
        let cli = Cli::try_parse_from(["loadgen", "run", "--prompts", "p.txt", "--users", "10", "--model", "llama3"]).unwrap();
        match cli.command {
            Commands::Run(a) => {
                assert_eq!(a.gpu, "Unknown");
                assert_eq!(a.pause_min, 3.0);
                assert_eq!(a.pause_max, 30.0);
                assert_eq!(a.step_size, 5);
                assert_eq!(a.test_duration, 300);
                assert_eq!(a.host, "127.0.0.1:11434");
                assert!(a.output.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
