//! User-facing pending actions projected from tool results.
//!
//! These are the request bodies the REST collaborators accept, so the serde
//! shape follows the dashboard API (camelCase, `type` for the activity kind).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The five activity kinds the dashboard can log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    #[default]
    Watering,
    Fertilizing,
    Spraying,
    Harvesting,
    Planting,
}

impl ActivityKind {
    pub const ALL: [ActivityKind; 5] = [
        ActivityKind::Watering,
        ActivityKind::Fertilizing,
        ActivityKind::Spraying,
        ActivityKind::Harvesting,
        ActivityKind::Planting,
    ];

    /// Unrecognized kinds fall back to `Watering`.
    #[must_use]
    pub fn normalize(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::default();
        };
        let raw = raw.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(raw))
            .unwrap_or_default()
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Watering => "watering",
            Self::Fertilizing => "fertilizing",
            Self::Spraying => "spraying",
            Self::Harvesting => "harvesting",
            Self::Planting => "planting",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    /// Anything other than low/medium/high (any case) becomes `Medium`.
    #[must_use]
    pub fn normalize(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("low") => Self::Low,
            Some("high") => Self::High,
            _ => Self::Medium,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingActivity {
    /// Identifier the tool result carried, if any. Never used for undo.
    #[serde(skip)]
    pub source_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl PendingActivity {
    #[must_use]
    pub fn new(kind: ActivityKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            source_id: None,
            kind,
            field_id: None,
            field_name: None,
            quantity: None,
            unit: None,
            notes: None,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTask {
    #[serde(skip)]
    pub source_id: Option<String>,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,
    pub due_at: DateTime<Utc>,
    pub priority: Priority,
}

impl PendingTask {
    #[must_use]
    pub fn new(title: impl Into<String>, due_at: DateTime<Utc>) -> Self {
        Self {
            source_id: None,
            title: title.into(),
            description: None,
            field_id: None,
            field_name: None,
            due_at,
            priority: Priority::Medium,
        }
    }
}

/// Which REST collection a pending action lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Activity,
    Task,
}

impl RecordKind {
    #[must_use]
    pub const fn collection(self) -> &'static str {
        match self {
            Self::Activity => "activities",
            Self::Task => "tasks",
        }
    }
}

/// A projected entity awaiting confirmation.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingAction {
    Activity(PendingActivity),
    Task(PendingTask),
}

impl PendingAction {
    #[must_use]
    pub fn record_kind(&self) -> RecordKind {
        match self {
            Self::Activity(_) => RecordKind::Activity,
            Self::Task(_) => RecordKind::Task,
        }
    }

    #[must_use]
    pub fn field_id(&self) -> Option<&str> {
        match self {
            Self::Activity(a) => a.field_id.as_deref(),
            Self::Task(t) => t.field_id.as_deref(),
        }
    }

    #[must_use]
    pub fn field_name(&self) -> Option<&str> {
        match self {
            Self::Activity(a) => a.field_name.as_deref(),
            Self::Task(t) => t.field_name.as_deref(),
        }
    }

    pub fn set_field_name(&mut self, name: String) {
        match self {
            Self::Activity(a) => a.field_name = Some(name),
            Self::Task(t) => t.field_name = Some(name),
        }
    }

    /// Short human label, e.g. "watering" or the task title.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Activity(a) => a.kind.as_str(),
            Self::Task(t) => &t.title,
        }
    }

    /// JSON body for the create request.
    pub fn to_request_body(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Self::Activity(a) => serde_json::to_value(a),
            Self::Task(t) => serde_json::to_value(t),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl ConfirmationStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// A farm field as listed by `GET /fields`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub id: String,
    pub name: String,
}
