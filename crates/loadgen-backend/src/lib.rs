//! Request outcomes and the backend seam the load workers drive.

use std::time::Duration;

pub mod ollama;
pub mod stream;

pub use ollama::OllamaBackend;

/// Why a single generation request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    Connection,
    /// Non-200 status from the server.
    Http(u16),
    /// The body broke off mid-stream.
    Stream,
    Other,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Timeout => f.write_str("timeout"),
            FailureKind::Connection => f.write_str("connection error"),
            FailureKind::Http(status) => write!(f, "http error {}", status),
            FailureKind::Stream => f.write_str("stream error"),
            FailureKind::Other => f.write_str("other error"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RequestOutcome {
    Success { total_latency: Duration, ttft: Duration },
    Failure { kind: FailureKind },
}

impl RequestOutcome {
    pub fn failure(kind: FailureKind) -> Self { RequestOutcome::Failure { kind } }
    pub fn is_success(&self) -> bool { matches!(self, RequestOutcome::Success { .. }) }
}

/// A target that can be health-checked and asked for one streamed generation.
///
/// `generate` never errors: every problem is folded into the returned outcome
/// so the caller can count it.
#[async_trait::async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Where requests go, for logs and errors.
    fn endpoint(&self) -> String;
    async fn health_check(&self) -> bool;
    async fn generate(&self, model: &str, prompt: &str) -> RequestOutcome;
}

#[cfg(feature = "mock")]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// One scripted reply. The mock sleeps for the reply's latency before
    /// answering so workers observe realistic pacing.
    #[derive(Debug, Clone, Copy)]
    pub enum MockReply {
        Success { latency: Duration, ttft: Duration },
        Failure { after: Duration, kind: FailureKind },
    }

    impl MockReply {
        pub fn success(latency: Duration, ttft: Duration) -> Self { MockReply::Success { latency, ttft } }
        pub fn failure(after: Duration, kind: FailureKind) -> Self { MockReply::Failure { after, kind } }
    }

    /// Replays its script in a loop.
    pub struct MockBackend {
        script: Vec<MockReply>,
        next: AtomicUsize,
        calls: AtomicUsize,
        healthy: bool,
    }

    impl Default for MockBackend {
        fn default() -> Self { Self::new() }
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self::scripted(vec![MockReply::success(Duration::from_millis(50), Duration::from_millis(10))])
        }

        pub fn scripted(script: Vec<MockReply>) -> Self {
            Self { script, next: AtomicUsize::new(0), calls: AtomicUsize::new(0), healthy: true }
        }

        pub fn unhealthy(mut self) -> Self {
            self.healthy = false;
            self
        }

        /// Number of `generate` calls that started.
        pub fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
    }

    #[async_trait::async_trait]
    impl InferenceBackend for MockBackend {
        fn endpoint(&self) -> String { "mock://".into() }

        async fn health_check(&self) -> bool { self.healthy }

        async fn generate(&self, _model: &str, _prompt: &str) -> RequestOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.script.is_empty() {
                return RequestOutcome::failure(FailureKind::Other);
            }
            let idx = self.next.fetch_add(1, Ordering::SeqCst) % self.script.len();
            match self.script[idx] {
                MockReply::Success { latency, ttft } => {
                    tokio::time::sleep(latency).await;
                    RequestOutcome::Success { total_latency: latency, ttft }
                }
                MockReply::Failure { after, kind } => {
                    tokio::time::sleep(after).await;
                    RequestOutcome::failure(kind)
                }
            }
        }
    }
}
