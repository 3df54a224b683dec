//! What the user sees, and what is sent back to the relay.
//!
//! The two diverge: the welcome line and error notices are shown but never
//! sent, and a reply that was cut off is shown but not remembered.

use chrono::{DateTime, Utc};
use orion_protocol::ChatMessage;
use serde::Serialize;
use uuid::Uuid;

pub const WELCOME_TEXT: &str =
    "Hi! I'm O.R.I.Ö.N, your AI assistant. How can I help you today? ✨";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    User,
    Assistant,
    /// Display-only status line, e.g. a rate-limit warning.
    Notice,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayMessage {
    pub id: Uuid,
    pub text: String,
    pub is_user: bool,
    pub timestamp: DateTime<Utc>,
    pub kind: MessageKind,
}

impl DisplayMessage {
    fn new(kind: MessageKind, text: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            text,
            is_user: kind == MessageKind::User,
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(MessageKind::User, text.into())
    }

    /// Empty assistant reply, filled in as the stream arrives.
    pub fn assistant() -> Self {
        Self::new(MessageKind::Assistant, String::new())
    }

    pub fn notice(text: impl Into<String>) -> Self {
        Self::new(MessageKind::Notice, text.into())
    }

    pub fn welcome() -> Self {
        Self::new(MessageKind::Assistant, WELCOME_TEXT.to_string())
    }
}

#[derive(Debug, Default)]
pub struct Transcript {
    messages: Vec<DisplayMessage>,
    history: Vec<ChatMessage>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[DisplayMessage] {
        &self.messages
    }

    /// Conversation as sent to the relay, oldest first.
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn get(&self, id: Uuid) -> Option<&DisplayMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn push(&mut self, message: DisplayMessage) {
        self.messages.push(message);
    }

    /// Append to the text of message `id`. False if no such message.
    pub fn append(&mut self, id: Uuid, text: &str) -> bool {
        match self.messages.iter_mut().rev().find(|m| m.id == id) {
            Some(message) => {
                message.text.push_str(text);
                true
            }
            None => false,
        }
    }

    /// Swap message `id` for `message`, keeping its position.
    pub fn replace(&mut self, id: Uuid, message: DisplayMessage) -> bool {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(slot) => {
                *slot = message;
                true
            }
            None => false,
        }
    }

    /// Drop message `id`. False if no such message.
    pub fn remove(&mut self, id: Uuid) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| m.id != id);
        self.messages.len() != before
    }

    pub fn record(&mut self, message: ChatMessage) {
        self.history.push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orion_protocol::Role;

    #[test]
    fn welcome_is_shown_but_not_history() {
        let mut transcript = Transcript::new();
        transcript.push(DisplayMessage::welcome());
        assert_eq!(transcript.messages().len(), 1);
        assert!(transcript.history().is_empty());
        assert_eq!(transcript.messages()[0].kind, MessageKind::Assistant);
    }

    #[test]
    fn append_grows_text_in_order() {
        let mut transcript = Transcript::new();
        let reply = DisplayMessage::assistant();
        let id = reply.id;
        transcript.push(reply);

        assert!(transcript.append(id, "Hel"));
        assert!(transcript.append(id, "lo!"));
        assert_eq!(transcript.get(id).map(|m| m.text.as_str()), Some("Hello!"));
        assert!(!transcript.append(Uuid::new_v4(), "lost"));
    }

    #[test]
    fn replace_keeps_position() {
        let mut transcript = Transcript::new();
        transcript.push(DisplayMessage::user("hi"));
        let reply = DisplayMessage::assistant();
        let id = reply.id;
        transcript.push(reply);
        transcript.push(DisplayMessage::user("later"));

        assert!(transcript.replace(id, DisplayMessage::notice("failed")));
        let kinds: Vec<MessageKind> = transcript.messages().iter().map(|m| m.kind).collect();
        assert_eq!(
            kinds,
            vec![MessageKind::User, MessageKind::Notice, MessageKind::User]
        );
    }

    #[test]
    fn remove_drops_only_that_message() {
        let mut transcript = Transcript::new();
        transcript.push(DisplayMessage::user("hi"));
        let reply = DisplayMessage::assistant();
        let id = reply.id;
        transcript.push(reply);

        assert!(transcript.remove(id));
        assert!(!transcript.remove(id));
        assert_eq!(transcript.messages().len(), 1);
        assert_eq!(transcript.messages()[0].kind, MessageKind::User);
    }

    #[test]
    fn history_is_independent_of_display() {
        let mut transcript = Transcript::new();
        transcript.push(DisplayMessage::notice("warning"));
        transcript.record(ChatMessage::user("question"));
        assert_eq!(transcript.history().len(), 1);
        assert_eq!(transcript.history()[0].role, Role::User);
    }

    #[test]
    fn only_user_messages_are_flagged_as_user() {
        assert!(DisplayMessage::user("x").is_user);
        assert!(!DisplayMessage::assistant().is_user);
        assert!(!DisplayMessage::notice("x").is_user);
    }
}
