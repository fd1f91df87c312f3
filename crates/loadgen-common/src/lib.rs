pub type Result<T> = core::result::Result<T, LoadError>;

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("inference server not reachable at {0}")]
    Unreachable(String),
    #[error("run interrupted")]
    Interrupted,
    #[error("config error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Message(String),
}

pub mod config {
    use serde::Deserialize;
    use std::env;
    use std::path::Path;
    use std::time::Duration;

    /// Tunables for the load engine. Every field has a default so a partial
    /// YAML file is enough.
    #[derive(Debug, Clone, Deserialize)]
    #[serde(default)]
    pub struct LoadConfig {
        pub request_timeout_secs: u64,
        pub health_timeout_secs: u64,
        pub stagger_ms: u64,
        pub check_interval_secs: u64,
        /// Percent, compared with `>`.
        pub abort_error_rate: f64,
        pub abort_min_requests: u64,
        pub settle_secs: u64,
        pub sample_interval_ms: u64,
    }

    impl Default for LoadConfig {
        fn default() -> Self {
            Self {
                request_timeout_secs: 120,
                health_timeout_secs: 5,
                stagger_ms: 100,
                check_interval_secs: 30,
                abort_error_rate: 30.0,
                abort_min_requests: 10,
                settle_secs: 10,
                sample_interval_ms: 1000,
            }
        }
    }

    impl LoadConfig {
        pub fn load() -> Self {
            if let Ok(path) = env::var("LOADGEN_CONFIG") {
                return match Self::from_file(&path) {
                    Ok(cfg) => cfg,
                    Err(e) => {
                        tracing::warn!(target: "config", "ignoring {}: {}", path, e);
                        Self::default()
                    }
                };
            }
            let mut cfg = Self::default();
            if let Some(v) = env_parse("LOADGEN_REQUEST_TIMEOUT_SECS") { cfg.request_timeout_secs = v; }
            if let Some(v) = env_parse("LOADGEN_HEALTH_TIMEOUT_SECS") { cfg.health_timeout_secs = v; }
            if let Some(v) = env_parse("LOADGEN_STAGGER_MS") { cfg.stagger_ms = v; }
            if let Some(v) = env_parse("LOADGEN_CHECK_INTERVAL_SECS") { cfg.check_interval_secs = v; }
            if let Some(v) = env_parse("LOADGEN_ABORT_ERROR_RATE") { cfg.abort_error_rate = v; }
            if let Some(v) = env_parse("LOADGEN_ABORT_MIN_REQUESTS") { cfg.abort_min_requests = v; }
            if let Some(v) = env_parse("LOADGEN_SETTLE_SECS") { cfg.settle_secs = v; }
            if let Some(v) = env_parse("LOADGEN_SAMPLE_INTERVAL_MS") { cfg.sample_interval_ms = v; }
            cfg
        }

        pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
            let text = std::fs::read_to_string(path)?;
            Self::from_yaml(&text)
        }

        pub fn from_yaml(text: &str) -> crate::Result<Self> {
            serde_yaml::from_str(text).map_err(|e| crate::LoadError::Config(e.to_string()))
        }

        pub fn request_timeout(&self) -> Duration { Duration::from_secs(self.request_timeout_secs) }
        pub fn health_timeout(&self) -> Duration { Duration::from_secs(self.health_timeout_secs) }
        pub fn stagger(&self) -> Duration { Duration::from_millis(self.stagger_ms) }
        pub fn check_interval(&self) -> Duration { Duration::from_secs(self.check_interval_secs) }
        pub fn settle(&self) -> Duration { Duration::from_secs(self.settle_secs) }
        pub fn sample_interval(&self) -> Duration { Duration::from_millis(self.sample_interval_ms) }
    }

    fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
        env::var(key).ok().and_then(|v| v.parse().ok())
    }

}
