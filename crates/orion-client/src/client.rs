//! HTTP client for the relay's chat endpoint.

use std::time::Duration;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use orion_protocol::{ChatRequest, ErrorBody, ErrorKind};
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

/// Body of an accepted chat request, one item per network read.
pub type BodyStream = BoxStream<'static, Result<Bytes, reqwest::Error>>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid relay url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("relay request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Outcome of opening a chat request.
pub enum RelayResponse {
    /// 200: the reply streams as plain text.
    Streaming(BodyStream),
    /// Refused before streaming started.
    Rejected { status: u16, body: ErrorBody },
}

#[derive(Debug, Clone)]
pub struct RelayClient {
    http: Client,
    endpoint: String,
    token: Option<String>,
}

impl RelayClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let endpoint = format!("{}/api/chat", base_url.trim_end_matches('/'));
        reqwest::Url::parse(&endpoint).map_err(|e| ClientError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;

        // No overall timeout; replies stream for as long as they take.
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            endpoint,
            token: None,
        })
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn open(&self, request: &ChatRequest) -> Result<RelayResponse, ClientError> {
        let mut builder = self.http.post(&self.endpoint).json(request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await?;
        let status = response.status();
        debug!(status = status.as_u16(), "relay responded");

        if status.is_success() {
            return Ok(RelayResponse::Streaming(response.bytes_stream().boxed()));
        }

        let status = status.as_u16();
        let text = response.text().await.unwrap_or_default();
        let body = serde_json::from_str::<ErrorBody>(&text)
            .unwrap_or_else(|_| ErrorBody::new(kind_for_status(status), fallback_message(status, text)));
        Ok(RelayResponse::Rejected { status, body })
    }
}

/// Kind for an error response that did not carry a JSON body, e.g. one
/// produced by a proxy in front of the relay.
fn kind_for_status(status: u16) -> ErrorKind {
    match status {
        400 | 413 | 415 | 422 => ErrorKind::InvalidRequest,
        429 => ErrorKind::RateLimited,
        402 => ErrorKind::QuotaExceeded,
        _ => ErrorKind::UpstreamError,
    }
}

fn fallback_message(status: u16, text: String) -> String {
    let text = text.trim();
    if text.is_empty() {
        format!("relay returned status {status}")
    } else {
        text.to_string()
    }
}
