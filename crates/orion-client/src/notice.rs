//! User-facing wording for failed and cut-off replies.

use std::time::Duration;

use orion_protocol::{ErrorBody, ErrorKind};

use crate::client::ClientError;

pub fn rejected(body: &ErrorBody) -> String {
    match body.kind {
        ErrorKind::RateLimited => match body.retry_after {
            Some(secs) => format!(
                "Too many requests right now. Please wait {secs}s and try again."
            ),
            None => "Too many requests right now. Please wait a moment and try again.".to_string(),
        },
        ErrorKind::QuotaExceeded => {
            "The assistant has run out of credits. Please try again later.".to_string()
        }
        ErrorKind::InvalidRequest => format!("The message could not be sent: {}", body.error),
        ErrorKind::UpstreamError => {
            "The assistant is unavailable right now. Please try again.".to_string()
        }
    }
}

pub fn unreachable(error: &ClientError) -> String {
    format!("Could not reach the assistant ({error}).")
}

pub fn interrupted() -> String {
    "The reply was interrupted before it finished.".to_string()
}

pub fn idle(limit: Duration) -> String {
    format!(
        "The reply stalled for more than {}s and was stopped.",
        limit.as_secs().max(1)
    )
}
