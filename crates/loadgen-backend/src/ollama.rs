//! Streaming client for an Ollama-compatible server.

use std::time::{Duration, Instant};

use loadgen_common::config::LoadConfig;
use loadgen_common::{LoadError, Result};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tokio_stream::StreamExt as _;

use crate::stream::{ChunkDecoder, StreamProgress};
use crate::{FailureKind, InferenceBackend, RequestOutcome};

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Clone)]
pub struct OllamaBackend {
    client: Client,
    base_url: String,
    request_timeout: Duration,
    health_timeout: Duration,
}

impl OllamaBackend {
    pub fn new(base_url: impl Into<String>, cfg: &LoadConfig) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| LoadError::Message(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            request_timeout: cfg.request_timeout(),
            health_timeout: cfg.health_timeout(),
        })
    }

    pub fn base_url(&self) -> &str { &self.base_url }
}

/// `127.0.0.1:11434` -> `http://127.0.0.1:11434`; explicit schemes are kept.
pub fn base_url_from_host(host: &str) -> String {
    let host = host.trim();
    if host.starts_with("http://") || host.starts_with("https://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", host.trim_end_matches('/'))
    }
}

fn classify(err: &reqwest::Error) -> FailureKind {
    if err.is_timeout() {
        FailureKind::Timeout
    } else if err.is_connect() {
        FailureKind::Connection
    } else {
        FailureKind::Other
    }
}

#[async_trait::async_trait]
impl InferenceBackend for OllamaBackend {
    fn endpoint(&self) -> String { self.base_url.clone() }

    async fn health_check(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).timeout(self.health_timeout).send().await {
            Ok(resp) => resp.status() == StatusCode::OK,
            Err(e) => {
                tracing::debug!(target: "backend", "health check failed: {}", e);
                false
            }
        }
    }

    async fn generate(&self, model: &str, prompt: &str) -> RequestOutcome {
        let url = format!("{}/api/generate", self.base_url);
        let req = GenerateRequest { model, prompt, stream: true };
        let start = Instant::now();
        let resp = match self.client.post(&url).json(&req).timeout(self.request_timeout).send().await {
            Ok(resp) => resp,
            Err(e) => return RequestOutcome::failure(classify(&e)),
        };
        if resp.status() != StatusCode::OK {
            return RequestOutcome::failure(FailureKind::Http(resp.status().as_u16()));
        }

        let mut decoder = ChunkDecoder::new();
        let mut progress = StreamProgress::new(start);
        let mut body = std::pin::pin!(resp.bytes_stream());
        'read: while let Some(item) = body.next().await {
            let bytes = match item {
                Ok(bytes) => bytes,
                Err(e) if e.is_timeout() => return RequestOutcome::failure(FailureKind::Timeout),
                Err(e) => {
                    tracing::debug!(target: "backend", "stream broke: {}", e);
                    return RequestOutcome::failure(FailureKind::Stream);
                }
            };
            for chunk in decoder.push(&bytes) {
                if progress.absorb(chunk) {
                    break 'read;
                }
            }
        }
        if !progress.is_done() {
            if let Some(chunk) = decoder.finish() {
                progress.absorb(chunk);
            }
        }

        let (total_latency, ttft) = progress.finish();
        tracing::trace!(target: "backend", chars = progress.text().len(), "response complete");
        RequestOutcome::Success { total_latency, ttft }
    }
}
