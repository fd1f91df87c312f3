//! Newline-delimited JSON decoding for `/api/generate` streams.

use std::time::{Duration, Instant};

use serde::Deserialize;

/// One object from the generate stream. Both fields are optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GenerateChunk {
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub done: bool,
}

/// Splits arbitrary byte slices into complete lines and parses each line.
/// Lines that are blank, not UTF-8 or not valid JSON are dropped.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    buf: Vec<u8>,
}

impl ChunkDecoder {
    pub fn new() -> Self { Self::default() }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<GenerateChunk> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(chunk) = parse_line(&line) {
                out.push(chunk);
            }
        }
        out
    }

    /// Parses whatever is left once the body ends without a trailing newline.
    pub fn finish(&mut self) -> Option<GenerateChunk> {
        let rest = std::mem::take(&mut self.buf);
        parse_line(&rest)
    }
}

fn parse_line(line: &[u8]) -> Option<GenerateChunk> {
    let Ok(text) = std::str::from_utf8(line) else {
        tracing::debug!(target: "backend", "skipping non-utf8 chunk ({} bytes)", line.len());
        return None;
    };
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    match serde_json::from_str::<GenerateChunk>(text) {
        Ok(chunk) => Some(chunk),
        Err(e) => {
            tracing::debug!(target: "backend", "skipping malformed chunk: {}", e);
            None
        }
    }
}

/// Timing state for one streamed response.
#[derive(Debug)]
pub struct StreamProgress {
    start: Instant,
    ttft: Option<Duration>,
    text: String,
    done: bool,
}

impl StreamProgress {
    pub fn new(start: Instant) -> Self {
        Self { start, ttft: None, text: String::new(), done: false }
    }

    /// Folds a chunk in. Returns true once the server signalled completion.
    pub fn absorb(&mut self, chunk: GenerateChunk) -> bool {
        if let Some(piece) = chunk.response {
            if !piece.is_empty() {
                if self.ttft.is_none() {
                    self.ttft = Some(self.start.elapsed());
                }
                self.text.push_str(&piece);
            }
        }
        if chunk.done {
            self.done = true;
        }
        self.done
    }

    pub fn is_done(&self) -> bool { self.done }
    pub fn text(&self) -> &str { &self.text }

    /// Total elapsed time and TTFT. A response that never carried text reports
    /// its total latency as TTFT.
    pub fn finish(&self) -> (Duration, Duration) {
        let total = self.start.elapsed();
        (total, self.ttft.unwrap_or(total))
    }
}
