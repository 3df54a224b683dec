//! Anthropic Messages API upstream with SSE streaming.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::openai::build_http_client;
use crate::parser::{AnthropicParser, DeltaParser};
use crate::upstream::{ByteStream, CompletionRequest, CompletionUpstream, UpstreamError};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Anthropic API client.
pub struct AnthropicUpstream {
    api_key: String,
    base_url: String,
    http: Client,
}

impl AnthropicUpstream {
    pub fn new(api_key: impl Into<String>) -> Result<Self, UpstreamError> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, UpstreamError> {
        Ok(Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: build_http_client()?,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }
}

#[async_trait]
impl CompletionUpstream for AnthropicUpstream {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn open(&self, request: &CompletionRequest) -> Result<ByteStream, UpstreamError> {
        let body = build_body(request);
        debug!(model = %body.model, messages = body.messages.len(), "opening message stream");

        let response = self
            .http
            .post(self.endpoint())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::from_status(status, &body));
        }

        Ok(response.bytes_stream().map_err(UpstreamError::from).boxed())
    }

    fn parser(&self) -> Box<dyn DeltaParser> {
        Box::new(AnthropicParser::new())
    }
}

fn build_body(request: &CompletionRequest) -> ApiRequest {
    ApiRequest {
        model: request.model.clone(),
        max_tokens: request.max_tokens,
        stream: true,
        temperature: request.temperature,
        system: request.system.clone(),
        messages: request
            .messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            })
            .collect(),
    }
}

// API request types

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    max_tokens: u32,
    stream: bool,
    temperature: f32,
    system: String,
    messages: Vec<ApiMessage>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}
