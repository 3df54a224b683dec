//! Presentation seam for a chat session.
//!
//! The session reports every visible change as a [`RenderEvent`] in the
//! order it happened. `TerminalRenderer<W: Write>` prints them
//! incrementally; [`Recorder`] keeps them for inspection.

use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use uuid::Uuid;

use crate::style::Style;
use crate::transcript::{DisplayMessage, MessageKind};

#[derive(Debug, Clone, PartialEq)]
pub enum RenderEvent {
    MessageAdded(DisplayMessage),
    /// `delta` was appended to the text of message `id`.
    TextAppended { id: Uuid, delta: String },
    /// Message `id` was swapped for `message` in place.
    MessageReplaced { id: Uuid, message: DisplayMessage },
    /// Message `id` is gone, e.g. a reply stopped before any text arrived.
    MessageRemoved { id: Uuid },
    StreamingChanged(bool),
}

pub trait Render: Send {
    fn render(&mut self, event: RenderEvent);
}

/// Keeps every event; clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<RenderEvent>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RenderEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Render for Recorder {
    fn render(&mut self, event: RenderEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

const ASSISTANT_PREFIX: &str = "orion › ";

/// Line-oriented terminal output. User input is already on screen, so user
/// messages are not echoed.
pub struct TerminalRenderer<W: Write> {
    writer: W,
    style: Style,
    streaming: bool,
    /// Reply currently being printed, if its line is still open.
    open: Option<Uuid>,
}

impl<W: Write> TerminalRenderer<W> {
    pub fn new(writer: W, style: Style) -> Self {
        Self {
            writer,
            style,
            streaming: false,
            open: None,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn close_line(&mut self) {
        if self.open.take().is_some() {
            let _ = writeln!(self.writer);
        }
    }

    fn print_message(&mut self, message: &DisplayMessage) {
        match message.kind {
            MessageKind::User => {}
            MessageKind::Assistant => {
                let _ = write!(
                    self.writer,
                    "{}{ASSISTANT_PREFIX}{}{}",
                    self.style.bold_cyan(),
                    self.style.reset(),
                    message.text
                );
                if self.streaming {
                    self.open = Some(message.id);
                } else {
                    let _ = writeln!(self.writer);
                }
            }
            MessageKind::Notice => {
                let _ = writeln!(
                    self.writer,
                    "{}! {}{}",
                    self.style.yellow(),
                    message.text,
                    self.style.reset()
                );
            }
        }
    }
}

impl<W: Write + Send> Render for TerminalRenderer<W> {
    fn render(&mut self, event: RenderEvent) {
        match event {
            RenderEvent::MessageAdded(message) => {
                self.close_line();
                self.print_message(&message);
            }
            RenderEvent::TextAppended { id, delta } => {
                if self.open == Some(id) {
                    let _ = write!(self.writer, "{delta}");
                }
            }
            RenderEvent::MessageReplaced { id, message } => {
                if self.open == Some(id) {
                    self.close_line();
                }
                self.print_message(&message);
            }
            RenderEvent::MessageRemoved { id } => {
                // Only an open, still empty reply line can be taken back.
                if self.open == Some(id) {
                    self.open = None;
                    let _ = write!(self.writer, "\r{}", self.style.clear_line());
                }
            }
            RenderEvent::StreamingChanged(streaming) => {
                self.streaming = streaming;
                if !streaming {
                    self.close_line();
                }
            }
        }
        let _ = self.writer.flush();
    }
}
