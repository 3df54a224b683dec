//! orion-backend: Upstream chat-completion adapters for the O.R.I.Ö.N relay.
//!
//! Every provider streams its answer with its own event framing. This crate
//! hides that behind two seams: [`CompletionUpstream`] opens the streamed
//! HTTP request, and [`DeltaParser`] turns the raw body bytes into text
//! deltas. The relay only ever sees bytes in and [`Frame`]s out.

pub mod anthropic;
pub mod mock;
pub mod openai;
pub mod parser;
pub mod sse;
pub mod upstream;

pub use anthropic::AnthropicUpstream;
pub use mock::{MockConfig, MockResponse, MockUpstream};
pub use openai::OpenAiUpstream;
pub use parser::{AnthropicParser, DeltaParser, Frame, OpenAiParser};
pub use upstream::{ByteStream, CompletionRequest, CompletionUpstream, UpstreamError};
