//! Single-slot tool lifecycle tracking.
//!
//! Only the most recent invocation is kept. `AgentStatus` mirrors the slot
//! while a tool is running and is cleared as soon as it settles.

use fieldhand_types::{AgentId, AgentStatus, ToolEvent, ToolStatus};
use serde_json::Value;

#[derive(Debug, Default)]
pub struct ToolCallTracker {
    active: Option<ToolEvent>,
    status: Option<AgentStatus>,
}

impl ToolCallTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_delta(
        &mut self,
        tool: &str,
        status: ToolStatus,
        message: Option<&str>,
        progress: Option<u8>,
    ) {
        match status {
            ToolStatus::Running => {
                self.active = Some(ToolEvent {
                    tool: tool.to_string(),
                    status,
                    message: message.map(str::to_string),
                    result: None,
                });
                self.status = Some(AgentStatus {
                    current: AgentId::from_tool(tool),
                    thinking: message.map_or_else(|| format!("Running {tool}"), str::to_string),
                    progress: progress.map(|p| p.min(100)),
                });
            }
            ToolStatus::Completed | ToolStatus::Error => {
                match &mut self.active {
                    Some(slot) if slot.tool == tool => {
                        slot.status = status;
                        if message.is_some() {
                            slot.message = message.map(str::to_string);
                        }
                    }
                    _ => {
                        self.active = Some(ToolEvent {
                            tool: tool.to_string(),
                            status,
                            message: message.map(str::to_string),
                            result: None,
                        });
                    }
                }
                if status == ToolStatus::Error {
                    tracing::debug!(tool, "Tool reported error");
                    self.status = None;
                }
            }
        }
    }

    pub fn on_result(&mut self, tool_name: &str, result: &Value) {
        let message = match self.active.take() {
            Some(slot) if slot.tool == tool_name => slot.message,
            _ => None,
        };
        self.active = Some(ToolEvent {
            tool: tool_name.to_string(),
            status: ToolStatus::Completed,
            message,
            result: Some(result.clone()),
        });
        self.status = None;
    }

    /// Stream ended or failed: nothing is running anymore.
    pub fn clear(&mut self) {
        self.active = None;
        self.status = None;
    }

    #[must_use]
    pub fn active(&self) -> Option<&ToolEvent> {
        self.active.as_ref()
    }

    #[must_use]
    pub fn agent_status(&self) -> Option<&AgentStatus> {
        self.status.as_ref()
    }
}
