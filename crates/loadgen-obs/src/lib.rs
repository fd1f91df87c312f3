//! Observability utilities: host CPU and memory sampling during a step

use std::sync::{Arc, Mutex};
use std::time::Duration;

use sysinfo::System;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// One host reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SystemSample {
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

/// Source of host readings. `None` means the reading failed and is skipped.
pub trait Sampler: Send + 'static {
    fn sample(&mut self) -> Option<SystemSample>;
}

/// Reads global CPU usage and used/total memory through `sysinfo`.
pub struct SysinfoSampler {
    sys: System,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let mut sys = System::new();
        // CPU usage is a delta between two refreshes; take the baseline now.
        sys.refresh_cpu();
        Self { sys }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self { Self::new() }
}

impl Sampler for SysinfoSampler {
    fn sample(&mut self) -> Option<SystemSample> {
        self.sys.refresh_cpu();
        self.sys.refresh_memory();
        let total = self.sys.total_memory();
        if total == 0 {
            return None;
        }
        let cpu = self.sys.global_cpu_info().cpu_usage() as f64;
        if !cpu.is_finite() {
            return None;
        }
        Some(SystemSample {
            cpu_percent: cpu,
            memory_percent: self.sys.used_memory() as f64 / total as f64 * 100.0,
        })
    }
}

type SamplerFactory = Box<dyn Fn() -> Box<dyn Sampler> + Send + Sync>;

/// Samples the host on a background task between `start` and `stop`.
pub struct ResourceMonitor {
    interval: Duration,
    samples: Arc<Mutex<Vec<SystemSample>>>,
    make_sampler: SamplerFactory,
    running: Option<(watch::Sender<bool>, JoinHandle<()>)>,
}

impl ResourceMonitor {
    pub fn new(interval: Duration) -> Self {
        Self::with_sampler(interval, || Box::new(SysinfoSampler::new()) as Box<dyn Sampler>)
    }

    pub fn with_sampler<F>(interval: Duration, make_sampler: F) -> Self
    where
        F: Fn() -> Box<dyn Sampler> + Send + Sync + 'static,
    {
        Self {
            interval: interval.max(Duration::from_millis(10)),
            samples: Arc::new(Mutex::new(Vec::new())),
            make_sampler: Box::new(make_sampler),
            running: None,
        }
    }

    /// Clears previous samples and begins sampling. A monitor that is already
    /// running is restarted.
    pub fn start(&mut self) {
        self.halt();
        self.samples.lock().unwrap_or_else(|e| e.into_inner()).clear();

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let samples = self.samples.clone();
        let interval = self.interval;
        let mut sampler = (self.make_sampler)();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match sampler.sample() {
                            Some(s) => samples.lock().unwrap_or_else(|e| e.into_inner()).push(s),
                            None => tracing::debug!(target: "monitor", "sample skipped"),
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
        });
        self.running = Some((stop_tx, handle));
    }

    /// Stops sampling and waits for the background task. Safe to call when
    /// never started.
    pub async fn stop(&mut self) {
        if let Some((stop_tx, handle)) = self.running.take() {
            let _ = stop_tx.send(true);
            if let Err(e) = handle.await {
                tracing::warn!(target: "monitor", "sampler task ended abnormally: {}", e);
            }
        }
    }

    fn halt(&mut self) {
        if let Some((stop_tx, handle)) = self.running.take() {
            let _ = stop_tx.send(true);
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool { self.running.is_some() }

    pub fn sample_count(&self) -> usize { self.samples.lock().unwrap_or_else(|e| e.into_inner()).len() }

    pub fn average_cpu(&self) -> f64 { self.average(|s| s.cpu_percent) }

    pub fn average_memory(&self) -> f64 { self.average(|s| s.memory_percent) }

    fn average(&self, field: impl Fn(&SystemSample) -> f64) -> f64 {
        let samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        if samples.is_empty() {
            return 0.0;
        }
        samples.iter().map(field).sum::<f64>() / samples.len() as f64
    }
}

impl Drop for ResourceMonitor {
    fn drop(&mut self) { self.halt(); }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<Option<SystemSample>>);

    impl Sampler for Fixed {
        fn sample(&mut self) -> Option<SystemSample> {
            if self.0.is_empty() { None } else { self.0.remove(0) }
        }
    }

    fn fixed_monitor() -> ResourceMonitor {
        ResourceMonitor::with_sampler(Duration::from_secs(1), || {
            Box::new(Fixed(vec![
                Some(SystemSample { cpu_percent: 10.0, memory_percent: 40.0 }),
                None,
                Some(SystemSample { cpu_percent: 30.0, memory_percent: 60.0 }),
            ])) as Box<dyn Sampler>
        })
    }

    #[tokio::test(start_paused = true)]
    async fn averages_collected_samples_and_skips_failures() {
        let mut monitor = fixed_monitor();
        monitor.start();
        tokio::time::sleep(Duration::from_millis(3500)).await;
        monitor.stop().await;
        assert!(!monitor.is_running());
        assert_eq!(monitor.sample_count(), 2);
        assert_eq!(monitor.average_cpu(), 20.0);
        assert_eq!(monitor.average_memory(), 50.0);
    }

    #[tokio::test]
    async fn stop_without_start_is_harmless() {
        let mut monitor = fixed_monitor();
        monitor.stop().await;
        monitor.stop().await;
        assert_eq!(monitor.average_cpu(), 0.0);
        assert_eq!(monitor.average_memory(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_clears_previous_samples() {
        let mut monitor = fixed_monitor();
        monitor.start();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        monitor.stop().await;
        assert_eq!(monitor.sample_count(), 1);

        monitor.start();
        monitor.stop().await;
        assert_eq!(monitor.sample_count(), 0);
        assert_eq!(monitor.average_cpu(), 0.0);
    }

    #[tokio::test]
    async fn sysinfo_sampler_reports_percentages() {
        let mut sampler = SysinfoSampler::new();
        if let Some(s) = sampler.sample() {
            assert!(s.memory_percent > 0.0 && s.memory_percent <= 100.0);
            assert!(s.cpu_percent >= 0.0);
        }
    }
}
