//! Typed frame payloads emitted by the agent runtime.
//!
//! Parse errors happen at the serde boundary, not scattered through decoding
//! logic. Every field the runtime may omit is optional here; the decoder
//! decides which omissions make a frame unusable.

use serde::Deserialize;
use serde_json::Value;

/// Top-level frame, tagged by its `type` field.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    #[serde(rename = "thread_item.delta")]
    ThreadItemDelta { delta: Option<ThreadItemDelta> },
    /// Flat text delta used by older runtimes.
    #[serde(rename = "message_delta")]
    MessageDelta {
        delta: Option<TextDelta>,
        text: Option<String>,
    },
    #[serde(rename = "tool_call_delta")]
    ToolCallDelta { delta: Option<ToolDelta> },
    #[serde(rename = "tool_call_result")]
    ToolCallResult {
        #[serde(rename = "toolName", alias = "tool_name")]
        tool_name: Option<String>,
        #[serde(default)]
        result: Value,
    },
    #[serde(rename = "citation")]
    Citation { citation: Option<CitationPayload> },
    /// Unknown frame type - forward compatibility
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
pub struct ThreadItemDelta {
    #[serde(default)]
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub part_type: Option<String>,
    pub text: Option<String>,
}

impl ContentPart {
    /// Output text parts carry assistant prose; other part types are ignored.
    #[must_use]
    pub fn output_text(&self) -> Option<&str> {
        match self.part_type.as_deref() {
            None | Some("output_text") => self.text.as_deref(),
            Some(_) => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TextDelta {
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ToolDelta {
    pub tool: Option<String>,
    pub status: Option<String>,
    pub message: Option<String>,
    pub progress: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct CitationPayload {
    pub source: Option<String>,
    pub confidence: Option<f32>,
    pub text: Option<String>,
    pub page: Option<PageRef>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// Pages arrive as numbers from most runtimes and as strings from some.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum PageRef {
    Number(u32),
    Text(String),
}

impl PageRef {
    #[must_use]
    pub fn as_number(&self) -> Option<u32> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}
