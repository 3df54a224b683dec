//! Scripted upstream for testing.
//!
//! Speaks the OpenAI event framing byte for byte, so tests exercise the same
//! parser and relay path as the real provider without network access.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::time::sleep;

use crate::parser::{DeltaParser, OpenAiParser};
use crate::upstream::{ByteStream, CompletionRequest, CompletionUpstream, UpstreamError};

/// Configurable mock responses for testing.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Emit one network read containing these bytes.
    Bytes { data: Vec<u8> },
    /// Fail the body stream, as a dropped connection would.
    Error { message: String },
    /// Delay before next read (for timing tests).
    Delay { ms: u64 },
}

/// Configuration for the mock upstream.
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// Reject the request with this status and body instead of streaming.
    pub status: Option<(u16, String)>,
    /// Sequence of body reads to emit.
    pub responses: Vec<MockResponse>,
    /// Optional delay between each read (ms).
    pub chunk_delay_ms: Option<u64>,
}

impl MockConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses(mut self, responses: Vec<MockResponse>) -> Self {
        self.responses = responses;
        self
    }

    pub fn with_status(mut self, status: u16, body: impl Into<String>) -> Self {
        self.status = Some((status, body.into()));
        self
    }

    pub fn with_chunk_delay(mut self, ms: u64) -> Self {
        self.chunk_delay_ms = Some(ms);
        self
    }
}

/// Upstream that replays a [`MockConfig`] and records what it was asked.
#[derive(Debug, Clone)]
pub struct MockUpstream {
    config: MockConfig,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl MockUpstream {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every request received so far, oldest first.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CompletionUpstream for MockUpstream {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn open(&self, request: &CompletionRequest) -> Result<ByteStream, UpstreamError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        if let Some((status, body)) = &self.config.status {
            return Err(UpstreamError::from_status(*status, body));
        }

        Ok(mock_byte_stream(self.config.clone()).boxed())
    }

    fn parser(&self) -> Box<dyn DeltaParser> {
        Box::new(OpenAiParser::new())
    }
}

/// Create the body stream from mock config.
pub fn mock_byte_stream(
    config: MockConfig,
) -> impl futures::Stream<Item = Result<Bytes, UpstreamError>> + Send + 'static {
    stream! {
        for response in config.responses {
            // Apply inter-read delay if configured
            if let Some(delay_ms) = config.chunk_delay_ms {
                sleep(Duration::from_millis(delay_ms)).await;
            }

            match response {
                MockResponse::Bytes { data } => {
                    yield Ok(Bytes::from(data));
                }
                MockResponse::Error { message } => {
                    yield Err(UpstreamError::Interrupted(message));
                    return;
                }
                MockResponse::Delay { ms } => {
                    sleep(Duration::from_millis(ms)).await;
                    // Delay doesn't emit a read
                }
            }
        }
    }
}

/// Built-in test fixtures for common scenarios.
pub mod fixtures {
    use super::*;

    /// The end-of-stream sentinel event.
    pub const DONE_EVENT: &str = "data: [DONE]\n\n";

    /// One completion event carrying `content`.
    pub fn openai_event(content: &str) -> String {
        let payload = serde_json::json!({
            "object": "chat.completion.chunk",
            "choices": [{ "index": 0, "delta": { "content": content } }],
        });
        format!("data: {payload}\n\n")
    }

    fn bytes(data: impl Into<Vec<u8>>) -> MockResponse {
        MockResponse::Bytes { data: data.into() }
    }

    /// One read per event, then the sentinel.
    pub fn streaming_text(chunks: &[&str]) -> MockConfig {
        let mut responses: Vec<MockResponse> =
            chunks.iter().map(|c| bytes(openai_event(c))).collect();
        responses.push(bytes(DONE_EVENT));
        MockConfig::new().with_responses(responses)
    }

    /// The same body as [`streaming_text`], re-cut into reads of `size` bytes
    /// regardless of event boundaries.
    pub fn streaming_text_split(chunks: &[&str], size: usize) -> MockConfig {
        let mut body: Vec<u8> = chunks.iter().flat_map(|c| openai_event(c).into_bytes()).collect();
        body.extend_from_slice(DONE_EVENT.as_bytes());
        let responses = body.chunks(size.max(1)).map(|piece| bytes(piece)).collect();
        MockConfig::new().with_responses(responses)
    }

    /// Events for `chunks` without the closing sentinel.
    pub fn missing_sentinel(chunks: &[&str]) -> MockConfig {
        let responses = chunks.iter().map(|c| bytes(openai_event(c))).collect();
        MockConfig::new().with_responses(responses)
    }

    /// Stream `before`, then fail the connection.
    pub fn error_mid_stream(before: &str, error: &str) -> MockConfig {
        MockConfig::new().with_responses(vec![
            bytes(openai_event(before)),
            MockResponse::Error {
                message: error.to_string(),
            },
        ])
    }

    /// Stream `before`, then an in-band error event from the provider.
    pub fn provider_error_after(before: &str, message: &str) -> MockConfig {
        let payload = serde_json::json!({ "error": { "message": message } });
        MockConfig::new().with_responses(vec![
            bytes(openai_event(before)),
            bytes(format!("data: {payload}\n\n")),
            bytes(openai_event("never")),
        ])
    }

    /// Stream `first`, stall for `ms`, then finish with `rest`.
    pub fn pause_after(first: &str, ms: u64, rest: &str) -> MockConfig {
        MockConfig::new().with_responses(vec![
            bytes(openai_event(first)),
            MockResponse::Delay { ms },
            bytes(openai_event(rest)),
            bytes(DONE_EVENT),
        ])
    }

    /// Reject the request with a 429 in the OpenAI error shape.
    pub fn rate_limited() -> MockConfig {
        MockConfig::new().with_status(
            429,
            r#"{"error":{"message":"Rate limit reached for requests"}}"#,
        )
    }
}
