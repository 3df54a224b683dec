//! OpenAI-compatible chat-completions upstream.
//!
//! Works against any gateway exposing `POST {base}/chat/completions` with
//! `stream: true` and the OpenAI event framing.

use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use crate::parser::{DeltaParser, OpenAiParser};
use crate::upstream::{ByteStream, CompletionRequest, CompletionUpstream, UpstreamError};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible streaming client.
pub struct OpenAiUpstream {
    api_key: String,
    base_url: String,
    http: Client,
}

/// Build an HTTP client for long-lived streamed responses.
///
/// Only connecting is bounded here. Silence between chunks is the relay's
/// idle timeout to enforce.
pub(crate) fn build_http_client() -> Result<Client, UpstreamError> {
    Ok(Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(8)
        .build()?)
}

impl OpenAiUpstream {
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
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl CompletionUpstream for OpenAiUpstream {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn open(&self, request: &CompletionRequest) -> Result<ByteStream, UpstreamError> {
        let body = build_body(request);
        debug!(
            model = %body.model,
            messages = body.messages.len(),
            "opening chat completion stream"
        );

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
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
        Box::new(OpenAiParser::new())
    }
}

fn build_body(request: &CompletionRequest) -> ApiRequest {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    messages.push(ApiMessage {
        role: "system".to_string(),
        content: request.system.clone(),
    });
    messages.extend(request.messages.iter().map(|m| ApiMessage {
        role: m.role.as_str().to_string(),
        content: m.content.clone(),
    }));

    ApiRequest {
        model: request.model.clone(),
        messages,
        stream: true,
        temperature: request.temperature,
        max_tokens: request.max_tokens,
    }
}

// API request types

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    stream: bool,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}
