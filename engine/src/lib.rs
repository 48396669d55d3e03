//! Core engine for Fieldhand - chat state, confirmation board and session driver.
//!
//! This crate contains the assistant-panel state machine without any UI.
//!
//! - [`reduce`] folds [`Action`]s into [`ChatState`] and returns [`Effect`]s
//! - [`Session`] executes those effects (chat stream, REST calls, countdown ticker)
//! - [`FieldhandConfig`] loads `~/.fieldhand/config.toml`

mod accumulator;
mod citations;
mod config;
mod confirmation;
mod errors;
mod projector;
mod session;
mod state;
mod tool_tracker;

pub use accumulator::Conversation;
pub use citations::CitationCollector;
pub use config::{
    BASE_URL_ENV, ConfigError, ConfirmationConfig, DEFAULT_BASE_URL, FieldhandConfig,
    IDLE_TIMEOUT_ENV, ResolvedConfig, RetrySection, ServerConfig, StreamConfig, config_path,
    expand_env_vars,
};
pub use confirmation::{
    BoardCommand, ConfirmationBoard, ConfirmationError, Countdown, DEFAULT_AUTO_CONFIRM_SECS,
    FailedCommand, PendingEntry, SyncState,
};
pub use errors::{STREAM_ERROR_BADGE, extract_error_message, format_stream_error};
pub use projector::{Projection, ProjectionError, is_projected_tool, project};
pub use session::{Session, SessionOptions, Update};
pub use state::{Action, ChatState, Effect, Notice, RequestKind, TurnState, reduce};
pub use tool_tracker::ToolCallTracker;

// Re-export from crates for public API
pub use fieldhand_client::{self, ChatClient, ClientConfig, FarmApi, HttpFarmApi, StreamSignal};
pub use fieldhand_types::{
    self,
    ActivityKind, AgentStatus, Citation, CitationKind, ConfirmationStatus, EntityKey, Field,
    Message, PendingAction, PendingActivity, PendingTask, Priority, RecordKind, Role, StreamEvent,
    ToolEvent, ToolStatus, TurnId,
};
