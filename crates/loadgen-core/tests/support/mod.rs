use std::sync::Arc;
use std::time::Duration;

use loadgen_obs::{ResourceMonitor, Sampler, SystemSample};

pub struct Steady;

impl Sampler for Steady {
    fn sample(&mut self) -> Option<SystemSample> {
        Some(SystemSample { cpu_percent: 25.0, memory_percent: 50.0 })
    }
}

pub fn monitor() -> ResourceMonitor {
    ResourceMonitor::with_sampler(Duration::from_secs(1), || Box::new(Steady) as Box<dyn Sampler>)
}

pub fn prompts() -> Arc<[String]> {
    Arc::from(vec!["Explain TCP slow start".to_string(), "Write a haiku about GPUs".to_string()])
}
