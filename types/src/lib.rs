//! Core domain types for Fieldhand.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.

mod action;
mod event;
mod ids;
mod message;

pub use action::{
    ActivityKind, ConfirmationStatus, Field, PendingAction, PendingActivity, PendingTask,
    Priority, RecordKind,
};
pub use event::{
    AgentStatus, Citation, CitationKind, DEFAULT_CITATION_CONFIDENCE, StreamEvent, ToolEvent,
    ToolStatus,
};
pub use ids::{AgentId, EntityKey, MessageId, TurnId};
pub use message::{Message, Role};

/// Truncate `text` to at most `max_chars` characters, marking the cut with an ellipsis.
#[must_use]
pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars <= 3 {
        return ".".repeat(max_chars);
    }
    let mut out: String = text.chars().take(max_chars - 3).collect();
    out.push_str("...");
    out
}
