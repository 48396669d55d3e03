//! Frame payload → [`StreamEvent`].
//!
//! Decoding is total: every line yields exactly one event or nothing. A
//! malformed frame is logged and skipped so the rest of the stream survives.

use fieldhand_types::{Citation, CitationKind, StreamEvent, ToolStatus};

use crate::frame::data_payload;
use crate::wire::{self, Frame};

const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Default)]
pub struct EventDecoder {
    decoded: usize,
    skipped: usize,
}

impl EventDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one complete stream line. Non-`data:` lines are ignored silently.
    pub fn decode_line(&mut self, line: &str) -> Option<StreamEvent> {
        let payload = data_payload(line)?;
        self.decode_payload(payload)
    }

    pub fn decode_payload(&mut self, payload: &str) -> Option<StreamEvent> {
        let payload = payload.trim();
        if payload.is_empty() || payload == DONE_SENTINEL {
            return None;
        }

        let event = match serde_json::from_str::<Frame>(payload) {
            Ok(frame) => classify(frame),
            Err(e) => {
                tracing::warn!(%e, payload_bytes = payload.len(), "Skipping malformed stream frame");
                None
            }
        };

        if event.is_some() {
            self.decoded += 1;
        } else {
            self.skipped += 1;
        }
        event
    }

    #[must_use]
    pub fn decoded(&self) -> usize {
        self.decoded
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

fn classify(frame: Frame) -> Option<StreamEvent> {
    match frame {
        Frame::ThreadItemDelta { delta } => {
            let text: String = delta?
                .content
                .iter()
                .filter_map(wire::ContentPart::output_text)
                .collect();
            non_empty_delta(text)
        }
        Frame::MessageDelta { delta, text } => {
            let text = delta.and_then(|d| d.text).or(text)?;
            non_empty_delta(text)
        }
        Frame::ToolCallDelta { delta } => {
            let Some(delta) = delta else {
                tracing::warn!("tool_call_delta frame without delta");
                return None;
            };
            let Some(tool) = delta.tool.filter(|t| !t.trim().is_empty()) else {
                tracing::warn!("tool_call_delta frame without tool name");
                return None;
            };
            let status = match delta.status.as_deref() {
                None => ToolStatus::Running,
                Some(raw) => {
                    let Some(status) = ToolStatus::parse(raw) else {
                        tracing::warn!(tool = %tool, status = raw, "Unknown tool status");
                        return None;
                    };
                    status
                }
            };
            let progress = delta
                .progress
                .filter(|p| p.is_finite())
                .map(|p| p.clamp(0.0, 100.0).round() as u8);
            Some(StreamEvent::ToolCallDelta {
                tool,
                status,
                message: delta.message,
                progress,
            })
        }
        Frame::ToolCallResult { tool_name, result } => {
            let Some(tool_name) = tool_name.filter(|t| !t.trim().is_empty()) else {
                tracing::warn!("tool_call_result frame without tool name");
                return None;
            };
            Some(StreamEvent::ToolCallResult { tool_name, result })
        }
        Frame::Citation { citation } => {
            let payload = citation?;
            let Some(source) = payload.source.filter(|s| !s.trim().is_empty()) else {
                tracing::warn!("citation frame without source");
                return None;
            };
            let kind = payload
                .kind
                .as_deref()
                .map_or(CitationKind::General, CitationKind::parse);
            let citation = Citation::new(source, payload.confidence, kind)
                .with_text(payload.text)
                .with_page(payload.page.as_ref().and_then(wire::PageRef::as_number));
            Some(StreamEvent::Citation(citation))
        }
        Frame::Unknown => {
            tracing::debug!("Ignoring unknown stream frame type");
            None
        }
    }
}

fn non_empty_delta(text: String) -> Option<StreamEvent> {
    if text.is_empty() {
        None
    } else {
        Some(StreamEvent::MessageDelta { text })
    }
}
