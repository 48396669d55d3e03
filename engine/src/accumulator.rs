//! Assistant message reconstruction from text deltas.

use chrono::{DateTime, Utc};
use fieldhand_types::{Message, MessageId};

/// Ordered conversation history with at most one open assistant message.
#[derive(Debug, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    /// Index of the assistant message still receiving deltas.
    open: Option<usize>,
    next_id: u64,
}

impl Conversation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> MessageId {
        let id = MessageId::new(self.next_id);
        self.next_id += 1;
        id
    }

    /// Append the user's message. Closes any open assistant message so the
    /// next delta starts a fresh one.
    pub fn push_user(&mut self, text: impl Into<String>, now: DateTime<Utc>) -> MessageId {
        self.freeze();
        let id = self.allocate_id();
        self.messages.push(Message::user(id, text, now));
        id
    }

    /// Fold one delta into the turn's assistant message, creating it on the first delta.
    pub fn apply_delta(&mut self, text: &str, now: DateTime<Utc>) -> MessageId {
        if let Some(index) = self.open {
            let message = &mut self.messages[index];
            message.push_str(text);
            return message.id();
        }

        let id = self.allocate_id();
        self.messages.push(Message::assistant(id, text, now));
        self.open = Some(self.messages.len() - 1);
        id
    }

    /// Close the open assistant message, if any.
    pub fn freeze(&mut self) {
        self.open = None;
    }

    /// Append a synthetic assistant message describing a failed turn.
    pub fn push_error(&mut self, text: impl Into<String>, now: DateTime<Utc>) -> MessageId {
        self.freeze();
        let id = self.allocate_id();
        self.messages.push(Message::assistant_error(id, text, now));
        id
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn open_message(&self) -> Option<&Message> {
        self.open.map(|index| &self.messages[index])
    }

    #[must_use]
    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role() == fieldhand_types::Role::Assistant)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
