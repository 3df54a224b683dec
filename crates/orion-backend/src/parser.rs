//! Provider event framing: raw body bytes in, text deltas out.
//!
//! A parser owns all buffering for its provider. Callers feed every read in
//! order and forward the returned frames; they never look at the bytes.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::sse::{SseDecoder, SseEvent};

/// One unit of parsed upstream output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Incremental response text.
    Delta(String),
    /// The provider's explicit end-of-response marker.
    Done,
    /// The provider reported an error inside the stream.
    Error(String),
}

/// Converts a provider's streamed body into [`Frame`]s.
pub trait DeltaParser: Send {
    /// Consume one network read. Returns the frames it completed, in order.
    fn feed(&mut self, bytes: &[u8]) -> Vec<Frame>;

    /// Called once when the body ends. Returns frames from buffered input.
    fn finish(&mut self) -> Vec<Frame>;
}

/// OpenAI-compatible chat-completion framing.
///
/// Each event is `data: {json}` with the text in
/// `choices[0].delta.content`; the stream ends with `data: [DONE]`.
#[derive(Debug, Default)]
pub struct OpenAiParser {
    sse: SseDecoder,
}

impl OpenAiParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn interpret(event: SseEvent) -> Option<Frame> {
        let data = event.data.trim();
        if data == "[DONE]" {
            return Some(Frame::Done);
        }

        let chunk: CompletionChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                debug!(error = %e, len = data.len(), "skipping malformed completion event");
                return None;
            }
        };

        if let Some(error) = chunk.error {
            return Some(Frame::Error(error_message(&error)));
        }

        chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty())
            .map(Frame::Delta)
    }
}

impl DeltaParser for OpenAiParser {
    fn feed(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.sse
            .feed(bytes)
            .into_iter()
            .filter_map(Self::interpret)
            .collect()
    }

    fn finish(&mut self) -> Vec<Frame> {
        self.sse.finish().and_then(Self::interpret).into_iter().collect()
    }
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Anthropic Messages API framing.
///
/// Text arrives in `content_block_delta` events carrying a `text_delta`; the
/// stream ends with a `message_stop` event. Thinking and tool deltas are not
/// part of the chat text and are ignored.
#[derive(Debug, Default)]
pub struct AnthropicParser {
    sse: SseDecoder,
}

impl AnthropicParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn interpret(event: SseEvent) -> Option<Frame> {
        let event_type = event.event_type.as_deref().unwrap_or("");
        if event_type == "message_stop" {
            return Some(Frame::Done);
        }

        let data: Value = match serde_json::from_str(&event.data) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, event_type, "skipping malformed message event");
                return None;
            }
        };

        match event_type {
            "content_block_delta" => {
                let delta = data.get("delta")?;
                if delta.get("type").and_then(|t| t.as_str()) != Some("text_delta") {
                    return None;
                }
                delta
                    .get("text")
                    .and_then(|t| t.as_str())
                    .filter(|text| !text.is_empty())
                    .map(|text| Frame::Delta(text.to_string()))
            }
            "error" => Some(Frame::Error(
                data.get("error")
                    .map(error_message)
                    .unwrap_or_else(|| "Unknown error".to_string()),
            )),
            _ => None,
        }
    }
}

impl DeltaParser for AnthropicParser {
    fn feed(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.sse
            .feed(bytes)
            .into_iter()
            .filter_map(Self::interpret)
            .collect()
    }

    fn finish(&mut self) -> Vec<Frame> {
        self.sse.finish().and_then(Self::interpret).into_iter().collect()
    }
}

/// Extract a readable message from a provider error object.
pub(crate) fn error_message(error: &Value) -> String {
    error
        .get("message")
        .and_then(|m| m.as_str())
        .or_else(|| error.as_str())
        .unwrap_or("Unknown error")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn openai_event(content: &str) -> String {
        let payload = serde_json::json!({ "choices": [{ "delta": { "content": content } }] });
        format!("data: {payload}\n\n")
    }

    fn feed_all(parser: &mut dyn DeltaParser, chunks: &[&[u8]]) -> Vec<Frame> {
        let mut frames = Vec::new();
        for chunk in chunks {
            frames.extend(parser.feed(chunk));
        }
        frames.extend(parser.finish());
        frames
    }

    #[test]
    fn openai_deltas_and_done() {
        let body = format!("{}{}data: [DONE]\n\n", openai_event("Hel"), openai_event("lo!"));
        let frames = feed_all(&mut OpenAiParser::new(), &[body.as_bytes()]);
        assert_eq!(
            frames,
            vec![
                Frame::Delta("Hel".to_string()),
                Frame::Delta("lo!".to_string()),
                Frame::Done,
            ]
        );
    }

    #[test]
    fn openai_event_split_across_reads_yields_one_delta() {
        let event = openai_event("split");
        let bytes = event.as_bytes();
        let mid = bytes.len() / 2;

        let mut parser = OpenAiParser::new();
        assert!(parser.feed(&bytes[..mid]).is_empty());
        assert_eq!(parser.feed(&bytes[mid..]), vec![Frame::Delta("split".to_string())]);
        assert!(parser.finish().is_empty());
    }

    #[test]
    fn openai_every_split_point_preserves_text() {
        let body = format!(
            "{}{}{}data: [DONE]\n\n",
            openai_event("Ol"),
            openai_event("á, Ö"),
            openai_event("rion")
        );
        let bytes = body.as_bytes();
        for cut in 0..=bytes.len() {
            let frames = feed_all(&mut OpenAiParser::new(), &[&bytes[..cut], &bytes[cut..]]);
            let text: String = frames
                .iter()
                .filter_map(|f| match f {
                    Frame::Delta(t) => Some(t.as_str()),
                    _ => None,
                })
                .collect();
            assert_eq!(text, "Olá, Örion", "cut at {cut}");
            assert_eq!(frames.last(), Some(&Frame::Done), "cut at {cut}");
        }
    }

    #[test]
    fn openai_malformed_event_is_skipped() {
        let body = format!("data: {{not json\n\n{}", openai_event("ok"));
        let frames = feed_all(&mut OpenAiParser::new(), &[body.as_bytes()]);
        assert_eq!(frames, vec![Frame::Delta("ok".to_string())]);
    }

    #[test]
    fn openai_role_only_and_empty_deltas_are_ignored() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"\"}}]}\n\n",
            "data: {\"choices\":[]}\n\n",
        );
        let frames = feed_all(&mut OpenAiParser::new(), &[body.as_bytes()]);
        assert!(frames.is_empty());
    }

    #[test]
    fn openai_in_band_error() {
        let body = "data: {\"error\":{\"message\":\"overloaded\"}}\n\n";
        let frames = feed_all(&mut OpenAiParser::new(), &[body.as_bytes()]);
        assert_eq!(frames, vec![Frame::Error("overloaded".to_string())]);
    }

    #[test]
    fn openai_done_without_trailing_newline() {
        let frames = feed_all(&mut OpenAiParser::new(), &[b"data: [DONE]"]);
        assert_eq!(frames, vec![Frame::Done]);
    }

    #[test]
    fn anthropic_text_deltas_and_stop() {
        let body = concat!(
            "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{}}\n\n",
            "event: content_block_delta\ndata: {\"delta\":{\"type\":\"thinking_delta\",\"thinking\":\"hmm\"}}\n\n",
            "event: content_block_delta\ndata: {\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\n\n",
            "event: content_block_delta\ndata: {\"delta\":{\"type\":\"text_delta\",\"text\":\" there\"}}\n\n",
            "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
        );
        let frames = feed_all(&mut AnthropicParser::new(), &[body.as_bytes()]);
        assert_eq!(
            frames,
            vec![
                Frame::Delta("Hi".to_string()),
                Frame::Delta(" there".to_string()),
                Frame::Done,
            ]
        );
    }

    #[test]
    fn anthropic_error_event() {
        let body = "event: error\ndata: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n";
        let frames = feed_all(&mut AnthropicParser::new(), &[body.as_bytes()]);
        assert_eq!(frames, vec![Frame::Error("Overloaded".to_string())]);
    }

    #[test]
    fn anthropic_malformed_event_is_skipped() {
        let body = concat!(
            "event: content_block_delta\ndata: {oops\n\n",
            "event: content_block_delta\ndata: {\"delta\":{\"type\":\"text_delta\",\"text\":\"ok\"}}\n\n",
        );
        let frames = feed_all(&mut AnthropicParser::new(), &[body.as_bytes()]);
        assert_eq!(frames, vec![Frame::Delta("ok".to_string())]);
    }
}
