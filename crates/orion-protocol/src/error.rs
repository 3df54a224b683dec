//! Structured error responses returned by the relay instead of a stream.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Client-facing error category.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or malformed input. Rejected before any upstream call.
    InvalidRequest,
    /// Throttled, either by the relay's own limiter or by the upstream.
    RateLimited,
    /// The upstream account ran out of credits.
    QuotaExceeded,
    /// Any other upstream failure.
    UpstreamError,
}

impl ErrorKind {
    /// HTTP status the relay answers with for this kind.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::InvalidRequest => 400,
            ErrorKind::RateLimited => 429,
            ErrorKind::QuotaExceeded => 402,
            ErrorKind::UpstreamError => 502,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::QuotaExceeded => "quota_exceeded",
            ErrorKind::UpstreamError => "upstream_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON body of a non-streaming error response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    /// Human readable message.
    pub error: String,
    pub kind: ErrorKind,
    /// Seconds the caller should wait before retrying.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorBody {
    pub fn new(kind: ErrorKind, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            kind,
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after = Some(secs);
        self
    }
}
