//! Server-Sent Events (SSE) decoder.
//!
//! Turns arbitrarily split body reads into complete SSE events according to
//! the W3C specification. Bytes are buffered until a full line is available,
//! so a multi-byte UTF-8 sequence split across two reads is never mangled.

/// A parsed SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The event type (from `event:` field). None if not specified.
    pub event_type: Option<String>,
    /// The event data (from `data:` field(s)).
    pub data: String,
}

/// Incremental SSE decoder. Feed it reads as they arrive.
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Bytes of the current, not yet terminated line.
    line_buf: Vec<u8>,
    /// Current event being accumulated
    current_event_type: Option<String>,
    /// Current data lines being accumulated
    current_data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one network read and return every event it completed.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        let mut rest = bytes;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.line_buf.extend_from_slice(&rest[..pos]);
            rest = &rest[pos + 1..];

            let raw = std::mem::take(&mut self.line_buf);
            let line = String::from_utf8_lossy(&raw);
            // Strip trailing \r if present
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(event) = self.process_line(line) {
                events.push(event);
            }
        }

        self.line_buf.extend_from_slice(rest);
        events
    }

    /// Flush whatever is buffered once the body has ended.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.line_buf.is_empty() {
            let raw = std::mem::take(&mut self.line_buf);
            let line = String::from_utf8_lossy(&raw).into_owned();
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(event) = self.process_line(line) {
                return Some(event);
            }
        }
        self.take_event()
    }

    /// True if a partial line or an unterminated event is buffered.
    pub fn has_pending(&self) -> bool {
        !self.line_buf.is_empty() || !self.current_data.is_empty()
    }

    /// Process a complete line. Returns an event if one is complete.
    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        // Empty line signals end of event
        if line.is_empty() {
            return self.take_event();
        }

        // Parse field:value
        if let Some(colon_pos) = line.find(':') {
            let field = &line[..colon_pos];
            // Value starts after colon, skip optional leading space
            let value = &line[colon_pos + 1..];
            let value = value.strip_prefix(' ').unwrap_or(value);

            match field {
                "event" => {
                    self.current_event_type = Some(value.to_string());
                }
                "data" => {
                    self.current_data.push(value.to_string());
                }
                // Ignore other fields (id, retry, comments)
                _ => {}
            }
        }
        // Lines without colons are comments or invalid, ignore them

        None
    }

    fn take_event(&mut self) -> Option<SseEvent> {
        if self.current_data.is_empty() {
            // A bare `event:` line without data is dropped per the SSE rules.
            self.current_event_type = None;
            return None;
        }

        let event = SseEvent {
            event_type: self.current_event_type.take(),
            data: self.current_data.join("\n"),
        };
        self.current_data.clear();
        Some(event)
    }
}
