//! Errors detected before the response stream starts.
//!
//! Once the relay has answered 200 the response type cannot change, so
//! these only ever become JSON bodies. Later failures abort the stream
//! instead (see [`crate::stream::Interruption`]).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use orion_backend::UpstreamError;
use orion_protocol::{ErrorBody, ErrorKind};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("rate limit exceeded, retry in {retry_after}s")]
    RateLimited { retry_after: u64 },
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            RelayError::RateLimited { .. } => ErrorKind::RateLimited,
            RelayError::Upstream(e) => e.kind(),
        }
    }

    /// The client-facing body. Upstream details stay in the logs.
    pub fn body(&self) -> ErrorBody {
        let kind = self.kind();
        match self {
            RelayError::InvalidRequest(reason) => ErrorBody::new(kind, reason.clone()),
            RelayError::RateLimited { retry_after } => ErrorBody::new(
                kind,
                "Too many requests. Please wait a moment before trying again.",
            )
            .with_retry_after(*retry_after),
            RelayError::Upstream(_) => ErrorBody::new(kind, upstream_message(kind)),
        }
    }
}

fn upstream_message(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::RateLimited => {
            "The assistant is receiving too many requests. Please wait a moment before trying again."
        }
        ErrorKind::QuotaExceeded => "The assistant has run out of credits.",
        _ => "The assistant is unavailable right now.",
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        if let RelayError::Upstream(e) = &self {
            warn!(kind = %kind, error = %e, "upstream rejected chat request");
        }
        let status =
            StatusCode::from_u16(kind.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.body())).into_response()
    }
}
