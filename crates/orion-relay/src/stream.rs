//! The relay loop: upstream reads in, content deltas out.
//!
//! Every delta is yielded the moment its event is complete. A clean end is
//! only signalled when the provider sends its end marker; anything else
//! ends the body with an error, which aborts the chunked response so the
//! client can tell an incomplete answer from a finished one.
//!
//! hyper drops the connection as soon as the body fails, discarding what
//! it has not yet written. Each error is therefore preceded by one yield to
//! the runtime, so the response head and earlier deltas reach the socket.

use std::time::Duration;

use async_stream::stream;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use orion_backend::{ByteStream, DeltaParser, Frame, UpstreamError};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Why a started stream could not be completed.
#[derive(Debug, Error)]
pub enum Interruption {
    #[error("upstream connection failed: {0}")]
    Transport(#[from] UpstreamError),
    #[error("upstream reported an error: {0}")]
    Provider(String),
    #[error("upstream ended without its completion marker")]
    Truncated,
    #[error("no upstream data for {0:?}")]
    Idle(Duration),
}

/// Forward the text deltas of `upstream`, parsed by `parser`.
pub fn relay_deltas(
    mut upstream: ByteStream,
    mut parser: Box<dyn DeltaParser>,
    idle_timeout: Option<Duration>,
) -> impl Stream<Item = Result<Bytes, Interruption>> + Send + 'static {
    stream! {
        let mut deltas = 0usize;
        let mut bytes_out = 0usize;

        loop {
            let next = match idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, upstream.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!(deltas, timeout = ?limit, "upstream went silent");
                        tokio::task::yield_now().await;
                        yield Err(Interruption::Idle(limit));
                        return;
                    }
                },
                None => upstream.next().await,
            };

            let (frames, ended) = match next {
                Some(Ok(read)) => (parser.feed(&read), false),
                Some(Err(e)) => {
                    warn!(deltas, error = %e, "upstream body failed mid-stream");
                    tokio::task::yield_now().await;
                    yield Err(Interruption::Transport(e));
                    return;
                }
                None => (parser.finish(), true),
            };

            for frame in frames {
                match frame {
                    Frame::Delta(text) => {
                        deltas += 1;
                        bytes_out += text.len();
                        yield Ok(Bytes::from(text));
                    }
                    Frame::Done => {
                        info!(deltas, bytes = bytes_out, "stream completed");
                        return;
                    }
                    Frame::Error(message) => {
                        warn!(deltas, error = %message, "upstream error event");
                        tokio::task::yield_now().await;
                        yield Err(Interruption::Provider(message));
                        return;
                    }
                }
            }

            if ended {
                debug!(deltas, "upstream closed before completion marker");
                tokio::task::yield_now().await;
                yield Err(Interruption::Truncated);
                return;
            }
        }
    }
}
