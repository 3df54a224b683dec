//! orion-relay: Streaming chat relay for O.R.I.Ö.N.
//!
//! Accepts a conversation over `POST /api/chat`, opens one streamed
//! completion against the configured upstream and re-emits only the text
//! deltas as a plain chunked body. Exposed as a library for integration
//! testing.

pub mod config;
pub mod error;
pub mod limiter;
pub mod server;
pub mod stream;

pub use config::Config;
pub use error::RelayError;
pub use server::{router, AppState};
