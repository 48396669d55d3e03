//! Conversation message model.
//!
//! Constructors take the timestamp explicitly; callers own the clock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::MessageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A conversation entry.
///
/// Assistant messages grow in place while their turn streams; once the turn
/// ends the owner stops handing out mutable access.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    role: Role,
    content: String,
    timestamp: DateTime<Utc>,
    /// Synthetic message standing in for a failed turn.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    is_error: bool,
}

impl Message {
    #[must_use]
    pub fn user(id: MessageId, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            role: Role::User,
            content: content.into(),
            timestamp,
            is_error: false,
        }
    }

    #[must_use]
    pub fn assistant(id: MessageId, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            role: Role::Assistant,
            content: content.into(),
            timestamp,
            is_error: false,
        }
    }

    #[must_use]
    pub fn assistant_error(
        id: MessageId,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            is_error: true,
            ..Self::assistant(id, content, timestamp)
        }
    }

    #[must_use]
    pub fn id(&self) -> MessageId {
        self.id
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.is_error
    }

    /// Append streamed text. Append-only: there is no patching of earlier text.
    pub fn push_str(&mut self, text: &str) {
        self.content.push_str(text);
    }
}
