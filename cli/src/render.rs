//! Plain-text rendering of board entries, citations and tool progress.

use fieldhand_engine::{
    Citation, CitationKind, ConfirmationStatus, PendingAction, PendingEntry, SyncState, ToolEvent,
    ToolStatus, fieldhand_types::truncate_with_ellipsis,
};

const NOTES_MAX_CHARS: usize = 60;

fn citation_kind(kind: CitationKind) -> &'static str {
    match kind {
        CitationKind::Guidebook => "guidebook",
        CitationKind::Weather => "weather",
        CitationKind::Field => "field",
        CitationKind::Web => "web",
        CitationKind::General => "general",
    }
}

fn describe_action(action: &PendingAction) -> String {
    let mut line = match action {
        PendingAction::Activity(activity) => {
            let mut text = activity.kind.to_string();
            if let Some(quantity) = activity.quantity {
                text.push_str(&format!(" {quantity}"));
                if let Some(unit) = &activity.unit {
                    text.push_str(&format!(" {unit}"));
                }
            }
            text
        }
        PendingAction::Task(task) => format!(
            "task \"{}\" due {} ({})",
            task.title,
            task.due_at.format("%Y-%m-%d"),
            task.priority.as_str()
        ),
    };
    if let Some(field) = action.field_name().or(action.field_id()) {
        line.push_str(&format!(" on {field}"));
    }
    if let PendingAction::Activity(activity) = action
        && let Some(notes) = &activity.notes
    {
        line.push_str(&format!(" - {}", truncate_with_ellipsis(notes, NOTES_MAX_CHARS)));
    }
    line
}

fn entry_state(entry: &PendingEntry) -> String {
    match (entry.status, entry.sync) {
        (_, SyncState::Creating { .. }) => "saving...".to_string(),
        (_, SyncState::Deleting) => "undoing...".to_string(),
        (ConfirmationStatus::Pending, SyncState::Idle) => match entry.seconds_left() {
            Some(secs) => format!("pending, saves in {secs}s"),
            None => "pending".to_string(),
        },
        (ConfirmationStatus::Confirmed, SyncState::Idle) if entry.can_undo() => {
            "saved".to_string()
        }
        (ConfirmationStatus::Confirmed, SyncState::Idle) => "saved (no undo)".to_string(),
        (ConfirmationStatus::Cancelled, SyncState::Idle) => "cancelled".to_string(),
    }
}

#[must_use]
pub fn entry_line(entry: &PendingEntry) -> String {
    let mut line = format!(
        "{} {} [{}]",
        entry.key,
        describe_action(&entry.action),
        entry_state(entry)
    );
    if let Some(error) = &entry.last_error {
        line.push_str(&format!(" last error: {error}"));
    }
    line
}

#[must_use]
pub fn citation_line(citation: &Citation) -> String {
    let mut line = format!(
        "[{}] {} ({:.0}%)",
        citation_kind(citation.kind),
        citation.source,
        citation.confidence * 100.0
    );
    if let Some(page) = citation.page {
        line.push_str(&format!(", p. {page}"));
    }
    line
}

/// One status line for the active tool, or `None` once it has settled quietly.
#[must_use]
pub fn tool_line(tool: &ToolEvent) -> Option<String> {
    match tool.status {
        ToolStatus::Running => Some(format!(
            "... {}",
            tool.message.as_deref().unwrap_or(&tool.tool)
        )),
        ToolStatus::Error => Some(format!(
            "! {} failed{}",
            tool.tool,
            tool.message
                .as_deref()
                .map(|m| format!(": {m}"))
                .unwrap_or_default()
        )),
        ToolStatus::Completed => None,
    }
}
