//! orion-client: Incremental consumer for the O.R.I.Ö.N chat relay.
//!
//! [`ChatSession`] drives one conversation: it sends the history, shows
//! the reply as it streams and keeps what the user saw consistent with
//! what is sent next. Rendering is pluggable through [`Render`].

pub mod client;
pub mod decode;
pub mod notice;
pub mod render;
pub mod session;
pub mod style;
pub mod transcript;

pub use client::{ClientError, RelayClient, RelayResponse};
pub use render::{Recorder, Render, RenderEvent, TerminalRenderer};
pub use session::{ChatSession, Failure, TurnOutcome};
pub use transcript::{DisplayMessage, MessageKind, Transcript};
