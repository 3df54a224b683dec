//! The seam between the relay and a chat-completion provider.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use orion_protocol::{ChatMessage, ErrorKind};
use serde_json::Value;
use thiserror::Error;

use crate::parser::{error_message, DeltaParser};

/// Raw upstream body, read by read.
pub type ByteStream = BoxStream<'static, Result<Bytes, UpstreamError>>;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The provider answered with a non-success status.
    #[error("upstream returned {status}: {message}")]
    Status {
        status: u16,
        kind: ErrorKind,
        message: String,
    },
    #[error("stream interrupted: {0}")]
    Interrupted(String),
}

impl UpstreamError {
    /// Classify a non-success upstream response.
    ///
    /// 429 means rate limited unless the body says the account is out of
    /// quota, which some providers also report as 429. 402 is quota. Every
    /// other status is a generic upstream error.
    pub fn from_status(status: u16, body: &str) -> Self {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let error = parsed.as_ref().and_then(|v| v.get("error"));

        let quota_marker = error
            .map(|e| {
                ["code", "type"].iter().any(|field| {
                    e.get(field).and_then(|v| v.as_str()) == Some("insufficient_quota")
                })
            })
            .unwrap_or(false);

        let kind = match status {
            429 if quota_marker => ErrorKind::QuotaExceeded,
            429 => ErrorKind::RateLimited,
            402 => ErrorKind::QuotaExceeded,
            _ => ErrorKind::UpstreamError,
        };

        let message = error
            .map(error_message)
            .or_else(|| {
                let trimmed = body.trim();
                (!trimmed.is_empty()).then(|| trimmed.chars().take(200).collect())
            })
            .unwrap_or_else(|| "no response body".to_string());

        UpstreamError::Status {
            status,
            kind,
            message,
        }
    }

    /// Client-facing category of this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            UpstreamError::Status { kind, .. } => *kind,
            UpstreamError::Http(_) | UpstreamError::Interrupted(_) => ErrorKind::UpstreamError,
        }
    }
}

/// A fully resolved completion request: system instruction plus history.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// A provider that can stream a chat completion.
#[async_trait]
pub trait CompletionUpstream: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &'static str;

    /// Issue the streamed request. Resolves once response headers arrive;
    /// a non-success status is returned as [`UpstreamError::Status`].
    async fn open(&self, request: &CompletionRequest) -> Result<ByteStream, UpstreamError>;

    /// A fresh parser for one response body of this provider.
    fn parser(&self) -> Box<dyn DeltaParser>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind_of(status: u16, body: &str) -> ErrorKind {
        UpstreamError::from_status(status, body).kind()
    }

    #[test]
    fn rate_limit_status() {
        assert_eq!(
            kind_of(429, r#"{"error":{"message":"Too many requests"}}"#),
            ErrorKind::RateLimited
        );
    }

    #[test]
    fn quota_reported_as_429() {
        let body = r#"{"error":{"message":"You exceeded your current quota","type":"insufficient_quota","code":"insufficient_quota"}}"#;
        assert_eq!(kind_of(429, body), ErrorKind::QuotaExceeded);
    }

    #[test]
    fn payment_required_is_quota() {
        assert_eq!(kind_of(402, ""), ErrorKind::QuotaExceeded);
    }

    #[test]
    fn other_statuses_are_upstream_errors() {
        for status in [400, 401, 403, 404, 500, 503] {
            assert_eq!(kind_of(status, "{}"), ErrorKind::UpstreamError, "{status}");
        }
    }

    #[test]
    fn message_extraction() {
        let err = UpstreamError::from_status(500, r#"{"error":{"message":"boom"}}"#);
        assert!(err.to_string().contains("boom"));

        let err = UpstreamError::from_status(503, "Service Unavailable");
        assert!(err.to_string().contains("Service Unavailable"));

        let err = UpstreamError::from_status(500, "   ");
        assert!(err.to_string().contains("no response body"));
    }

    #[test]
    fn transport_errors_are_upstream_errors() {
        let err = UpstreamError::Interrupted("reset".to_string());
        assert_eq!(err.kind(), ErrorKind::UpstreamError);
    }
}
