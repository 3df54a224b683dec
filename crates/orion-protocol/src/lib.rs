//! orion-protocol: Wire types shared by the O.R.I.Ö.N relay and its clients.
//!
//! The relay accepts a [`ChatRequest`] and answers either with a plain text
//! byte stream or with an [`ErrorBody`]. Both sides depend on this crate so
//! the JSON shapes cannot drift apart.

pub mod error;
pub mod message;

pub use error::{ErrorBody, ErrorKind};
pub use message::{ChatMessage, ChatRequest, Role};
