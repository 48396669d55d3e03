//! Chat state and the reducer that drives it.
//!
//! Every state change goes through [`reduce`]: the session feeds it actions
//! (user commands, stream signals, timer ticks, settled REST calls) and
//! executes the [`Effect`]s it returns. Nothing here performs IO.

use std::collections::HashMap;
use std::fmt;

use chrono::Utc;
use fieldhand_client::{ChatRequest, HistoryEntry, StreamError};
use fieldhand_types::{
    AgentStatus, EntityKey, Field, PendingAction, PendingTask, RecordKind, StreamEvent, ToolEvent,
    TurnId,
};

use crate::accumulator::Conversation;
use crate::citations::CitationCollector;
use crate::confirmation::{BoardCommand, ConfirmationBoard, ConfirmationError, SyncState};
use crate::errors::format_stream_error;
use crate::projector::{self, Projection};
use crate::tool_tracker::ToolCallTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Streaming(TurnId),
}

#[derive(Debug)]
pub struct ChatState {
    conversation: Conversation,
    tools: ToolCallTracker,
    citations: CitationCollector,
    board: ConfirmationBoard,
    /// Field id → display name, from `GET /fields`.
    fields: HashMap<String, String>,
    turn: TurnState,
    last_turn: TurnId,
}

impl Default for ChatState {
    fn default() -> Self {
        Self::new(ConfirmationBoard::default())
    }
}

impl ChatState {
    #[must_use]
    pub fn new(board: ConfirmationBoard) -> Self {
        Self {
            conversation: Conversation::new(),
            tools: ToolCallTracker::new(),
            citations: CitationCollector::new(),
            board,
            fields: HashMap::new(),
            turn: TurnState::Idle,
            last_turn: TurnId::new(0),
        }
    }

    #[must_use]
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    #[must_use]
    pub fn active_tool(&self) -> Option<&ToolEvent> {
        self.tools.active()
    }

    #[must_use]
    pub fn agent_status(&self) -> Option<&AgentStatus> {
        self.tools.agent_status()
    }

    #[must_use]
    pub fn citations(&self) -> &CitationCollector {
        &self.citations
    }

    #[must_use]
    pub fn board(&self) -> &ConfirmationBoard {
        &self.board
    }

    #[must_use]
    pub fn turn(&self) -> TurnState {
        self.turn
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        matches!(self.turn, TurnState::Streaming(_))
    }

    #[must_use]
    pub fn field_name(&self, id: &str) -> Option<&str> {
        self.fields.get(id).map(String::as_str)
    }

    fn is_current(&self, turn: TurnId) -> bool {
        self.turn == TurnState::Streaming(turn)
    }

    fn lookup_field_name(&self, field_id: Option<&str>) -> Option<String> {
        field_id.and_then(|id| self.fields.get(id)).cloned()
    }

    fn history(&self) -> Vec<HistoryEntry> {
        self.conversation
            .messages()
            .iter()
            .filter(|m| !m.is_error() && !m.content().is_empty())
            .map(|m| HistoryEntry {
                role: m.role().as_str(),
                content: m.content().to_string(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Submit { text: String },
    Stream { turn: TurnId, event: StreamEvent },
    StreamFinished { turn: TurnId },
    StreamFailed { turn: TurnId, error: StreamError },
    Tick,
    Confirm(EntityKey),
    Cancel(EntityKey),
    Undo(EntityKey),
    SetAutoConfirm { key: EntityKey, enabled: bool },
    Dismiss(EntityKey),
    RetryLastFailed,
    /// Create finished: the server id on success, the error text on failure.
    CreateSettled {
        key: EntityKey,
        outcome: Result<Option<String>, String>,
    },
    DeleteSettled {
        key: EntityKey,
        outcome: Result<(), String>,
    },
    FieldsLoaded(Vec<Field>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    OpenStream { turn: TurnId, request: ChatRequest },
    CreateRecord { key: EntityKey, action: PendingAction },
    DeleteRecord {
        key: EntityKey,
        kind: RecordKind,
        server_id: String,
    },
    TasksScheduled(Vec<PendingTask>),
    Notify(Notice),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Create,
    Delete,
}

/// Something the user should be told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    EmptyMessage,
    TurnInFlight,
    Rejected(ConfirmationError),
    Saved { key: EntityKey, label: String },
    Undone { key: EntityKey },
    /// Save failed after undo was already requested; the entity is gone.
    Discarded { key: EntityKey, error: String },
    ActionFailed {
        key: EntityKey,
        request: RequestKind,
        error: String,
    },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMessage => f.write_str("Nothing to send"),
            Self::TurnInFlight => f.write_str("Wait for the current reply to finish"),
            Self::Rejected(err) => write!(f, "Rejected: {err}"),
            Self::Saved { key, label } => write!(f, "Saved {key} ({label})"),
            Self::Undone { key } => write!(f, "Undid {key}"),
            Self::Discarded { key, error } => {
                write!(f, "Could not save {key}: {error} (undo requested, discarded)")
            }
            Self::ActionFailed {
                key,
                request,
                error,
            } => {
                let verb = match request {
                    RequestKind::Create => "save",
                    RequestKind::Delete => "undo",
                };
                write!(f, "Could not {verb} {key}: {error} (use /retry)")
            }
        }
    }
}

fn undo_queued(state: &ChatState, key: EntityKey) -> bool {
    state.board.get(key).is_some_and(|entry| {
        entry.sync == SyncState::Creating { undo_queued: true }
    })
}

fn command_effect(command: BoardCommand) -> Effect {
    match command {
        BoardCommand::Create { key, action } => Effect::CreateRecord { key, action },
        BoardCommand::Delete {
            key,
            kind,
            server_id,
        } => Effect::DeleteRecord {
            key,
            kind,
            server_id,
        },
    }
}

fn board_result<T>(
    result: Result<T, ConfirmationError>,
    into_effects: impl FnOnce(T) -> Vec<Effect>,
) -> Vec<Effect> {
    match result {
        Ok(value) => into_effects(value),
        Err(err) => {
            tracing::debug!(%err, "Board transition rejected");
            vec![Effect::Notify(Notice::Rejected(err))]
        }
    }
}

pub fn reduce(state: &mut ChatState, action: Action) -> Vec<Effect> {
    match action {
        Action::Submit { text } => submit(state, text),
        Action::Stream { turn, event } => {
            if !state.is_current(turn) {
                tracing::debug!(%turn, kind = event.kind(), "Dropping event from stale turn");
                return Vec::new();
            }
            apply_event(state, event)
        }
        Action::StreamFinished { turn } => {
            if state.is_current(turn) {
                state.conversation.freeze();
                state.tools.clear();
                state.turn = TurnState::Idle;
                tracing::debug!(%turn, "Turn finished");
            }
            Vec::new()
        }
        Action::StreamFailed { turn, error } => {
            if state.is_current(turn) {
                tracing::warn!(%turn, %error, "Turn failed");
                state
                    .conversation
                    .push_error(format_stream_error(&error), Utc::now());
                state.tools.clear();
                state.turn = TurnState::Idle;
            }
            Vec::new()
        }
        Action::Tick => state.board.tick().into_iter().map(command_effect).collect(),
        Action::Confirm(key) => board_result(state.board.confirm(key), |c| vec![command_effect(c)]),
        Action::Cancel(key) => board_result(state.board.cancel(key), |()| Vec::new()),
        Action::Undo(key) => board_result(state.board.undo(key), |command| {
            command.into_iter().map(command_effect).collect()
        }),
        Action::SetAutoConfirm { key, enabled } => {
            board_result(state.board.set_auto_confirm(key, enabled), |()| Vec::new())
        }
        Action::Dismiss(key) => board_result(state.board.dismiss(key), |_| Vec::new()),
        Action::RetryLastFailed => {
            board_result(state.board.retry_last_failed(), |c| vec![command_effect(c)])
        }
        Action::CreateSettled { key, outcome } => {
            let notice = match &outcome {
                Ok(_) => state.board.get(key).map(|entry| Notice::Saved {
                    key,
                    label: entry.action.label().to_string(),
                }),
                Err(error) if undo_queued(state, key) => Some(Notice::Discarded {
                    key,
                    error: error.clone(),
                }),
                Err(error) => Some(Notice::ActionFailed {
                    key,
                    request: RequestKind::Create,
                    error: error.clone(),
                }),
            };
            let mut effects: Vec<Effect> = state
                .board
                .create_settled(key, outcome)
                .into_iter()
                .map(command_effect)
                .collect();
            effects.extend(notice.map(Effect::Notify));
            effects
        }
        Action::DeleteSettled { key, outcome } => {
            let notice = match &outcome {
                Ok(()) => Notice::Undone { key },
                Err(error) => Notice::ActionFailed {
                    key,
                    request: RequestKind::Delete,
                    error: error.clone(),
                },
            };
            state.board.delete_settled(key, outcome);
            vec![Effect::Notify(notice)]
        }
        Action::FieldsLoaded(fields) => {
            state.fields = fields.into_iter().map(|f| (f.id, f.name)).collect();
            let fields = &state.fields;
            state
                .board
                .backfill_field_names(|id| fields.get(id).cloned());
            Vec::new()
        }
    }
}

fn submit(state: &mut ChatState, text: String) -> Vec<Effect> {
    let text = text.trim().to_string();
    if text.is_empty() {
        return vec![Effect::Notify(Notice::EmptyMessage)];
    }
    if state.is_streaming() {
        return vec![Effect::Notify(Notice::TurnInFlight)];
    }

    let history = state.history();
    state.conversation.push_user(text.clone(), Utc::now());
    state.citations.reset();
    state.tools.clear();

    let turn = state.last_turn.next();
    state.last_turn = turn;
    state.turn = TurnState::Streaming(turn);
    tracing::debug!(%turn, "Turn started");

    vec![Effect::OpenStream {
        turn,
        request: ChatRequest {
            message: text,
            history,
        },
    }]
}

fn apply_event(state: &mut ChatState, event: StreamEvent) -> Vec<Effect> {
    match event {
        StreamEvent::MessageDelta { text } => {
            state.conversation.apply_delta(&text, Utc::now());
            Vec::new()
        }
        StreamEvent::ToolCallDelta {
            tool,
            status,
            message,
            progress,
        } => {
            state
                .tools
                .on_delta(&tool, status, message.as_deref(), progress);
            Vec::new()
        }
        StreamEvent::ToolCallResult { tool_name, result } => {
            state.tools.on_result(&tool_name, &result);
            match projector::project(&tool_name, &result, Utc::now()) {
                Ok(Some(Projection::Tasks(mut tasks))) => {
                    if tasks.is_empty() {
                        return Vec::new();
                    }
                    for task in &mut tasks {
                        if task.field_name.is_none() {
                            task.field_name = state.lookup_field_name(task.field_id.as_deref());
                        }
                    }
                    for task in &tasks {
                        state.board.append(PendingAction::Task(task.clone()));
                    }
                    tracing::info!(count = tasks.len(), tool = %tool_name, "Tasks scheduled");
                    vec![Effect::TasksScheduled(tasks)]
                }
                Ok(Some(Projection::Activity(mut activity))) => {
                    if activity.field_name.is_none() {
                        activity.field_name = state.lookup_field_name(activity.field_id.as_deref());
                    }
                    state.board.append(PendingAction::Activity(activity));
                    Vec::new()
                }
                Ok(None) => Vec::new(),
                Err(err) => {
                    tracing::warn!(%err, "Dropping unprojectable tool result");
                    Vec::new()
                }
            }
        }
        StreamEvent::Citation(citation) => {
            state.citations.push(citation);
            Vec::new()
        }
    }
}
