//! Decoded stream events and the per-turn state derived from them.

use serde::{Deserialize, Serialize};

use crate::ids::AgentId;

/// Lifecycle of a tool invocation as reported by the agent runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Running,
    Completed,
    Error,
}

impl ToolStatus {
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "running" => Some(Self::Running),
            "completed" | "complete" | "done" => Some(Self::Completed),
            "error" | "failed" => Some(Self::Error),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

/// Source category of a citation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CitationKind {
    Guidebook,
    Weather,
    Field,
    Web,
    #[default]
    General,
}

impl CitationKind {
    /// Unknown kinds fold into `General`.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "guidebook" => Self::Guidebook,
            "weather" => Self::Weather,
            "field" => Self::Field,
            "web" => Self::Web,
            _ => Self::General,
        }
    }
}

pub const DEFAULT_CITATION_CONFIDENCE: f32 = 0.5;

/// A source the assistant relied on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub source: String,
    /// Always within `[0, 1]`.
    pub confidence: f32,
    pub text: Option<String>,
    pub page: Option<u32>,
    pub kind: CitationKind,
}

impl Citation {
    #[must_use]
    pub fn new(source: impl Into<String>, confidence: Option<f32>, kind: CitationKind) -> Self {
        let confidence = confidence
            .filter(|c| c.is_finite())
            .unwrap_or(DEFAULT_CITATION_CONFIDENCE)
            .clamp(0.0, 1.0);
        Self {
            source: source.into(),
            confidence,
            text: None,
            page: None,
            kind,
        }
    }

    #[must_use]
    pub fn with_text(mut self, text: Option<String>) -> Self {
        self.text = text;
        self
    }

    #[must_use]
    pub fn with_page(mut self, page: Option<u32>) -> Self {
        self.page = page;
        self
    }
}

/// One decoded frame of the assistant stream. Immutable once decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Incremental assistant text.
    MessageDelta { text: String },
    /// Progress report for the tool currently running.
    ToolCallDelta {
        tool: String,
        status: ToolStatus,
        message: Option<String>,
        progress: Option<u8>,
    },
    /// Final payload of a tool invocation.
    ToolCallResult {
        tool_name: String,
        result: serde_json::Value,
    },
    Citation(Citation),
}

impl StreamEvent {
    #[must_use]
    pub fn message_delta(text: impl Into<String>) -> Self {
        Self::MessageDelta { text: text.into() }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MessageDelta { .. } => "message_delta",
            Self::ToolCallDelta { .. } => "tool_call_delta",
            Self::ToolCallResult { .. } => "tool_call_result",
            Self::Citation(_) => "citation",
        }
    }
}

/// The single "what is the system doing right now" slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolEvent {
    pub tool: String,
    pub status: ToolStatus,
    pub message: Option<String>,
    pub result: Option<serde_json::Value>,
}

/// Which logical agent is active and what it is doing.
///
/// Only exists while a turn is in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentStatus {
    pub current: AgentId,
    pub thinking: String,
    /// Percent complete, `0..=100`.
    pub progress: Option<u8>,
}
