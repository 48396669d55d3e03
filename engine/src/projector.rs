//! Tool results → user-facing pending entities.
//!
//! Only two tool families are projected: task scheduling and activity logging.
//! The projector never touches confirmation status; it only produces drafts
//! that the board appends.

use chrono::{DateTime, NaiveDate, Utc};
use fieldhand_types::{ActivityKind, PendingActivity, PendingTask, Priority};
use serde_json::{Map, Value};

const SCHEDULE_TASK_TOOL: &str = "command_bus.schedule_task";
const SCHEDULE_TASK_SEGMENT: &str = "schedule_task";
const LOG_ACTIVITY_TOOL: &str = "activities.log";
const LOG_ACTIVITY_SEGMENT: &str = "log_activity";
const UNTITLED_TASK: &str = "Untitled task";

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// One scheduling call; may carry several tasks, in result order.
    Tasks(Vec<PendingTask>),
    Activity(PendingActivity),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProjectionError {
    #[error("{tool} result is not an object")]
    NotAnObject { tool: String },
    #[error("{tool} result has no task records")]
    MissingTasks { tool: String },
    #[error("{tool} result has no activity record")]
    MissingActivity { tool: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProjectedTool {
    ScheduleTask,
    LogActivity,
}

fn classify_tool(name: &str) -> Option<ProjectedTool> {
    let name = name.trim();
    let last_segment = name.rsplit('.').next().unwrap_or(name);
    if name == SCHEDULE_TASK_TOOL || last_segment == SCHEDULE_TASK_SEGMENT {
        Some(ProjectedTool::ScheduleTask)
    } else if name == LOG_ACTIVITY_TOOL || last_segment == LOG_ACTIVITY_SEGMENT {
        Some(ProjectedTool::LogActivity)
    } else {
        None
    }
}

/// Whether results of `tool_name` are projected at all.
#[must_use]
pub fn is_projected_tool(tool_name: &str) -> bool {
    classify_tool(tool_name).is_some()
}

/// Project one `tool_call_result`.
///
/// `Ok(None)` means the tool is not one we project.
pub fn project(
    tool_name: &str,
    result: &Value,
    now: DateTime<Utc>,
) -> Result<Option<Projection>, ProjectionError> {
    let Some(tool) = classify_tool(tool_name) else {
        return Ok(None);
    };
    let Some(object) = result.as_object() else {
        return Err(ProjectionError::NotAnObject {
            tool: tool_name.to_string(),
        });
    };

    match tool {
        ProjectedTool::ScheduleTask => project_tasks(tool_name, object, now).map(Some),
        ProjectedTool::LogActivity => project_activity(tool_name, object, now).map(Some),
    }
}

fn project_tasks(
    tool_name: &str,
    result: &Map<String, Value>,
    now: DateTime<Utc>,
) -> Result<Projection, ProjectionError> {
    let records: Vec<&Value> = match (result.get("tasks"), result.get("task")) {
        (Some(Value::Array(tasks)), _) => tasks.iter().collect(),
        (_, Some(task @ Value::Object(_))) => vec![task],
        _ => {
            return Err(ProjectionError::MissingTasks {
                tool: tool_name.to_string(),
            });
        }
    };

    let tasks = records
        .into_iter()
        .enumerate()
        .filter_map(|(index, record)| {
            let Some(record) = record.as_object() else {
                tracing::warn!(tool = tool_name, index, "Skipping non-object task record");
                return None;
            };
            Some(task_from_record(record, now))
        })
        .collect();
    Ok(Projection::Tasks(tasks))
}

fn task_from_record(record: &Map<String, Value>, now: DateTime<Utc>) -> PendingTask {
    let title = text(record, &["title", "name"]).unwrap_or_else(|| UNTITLED_TASK.to_string());
    let due_at = text(record, &["dueAt", "due_at", "dueDate"])
        .and_then(|raw| {
            let parsed = parse_date(&raw);
            if parsed.is_none() {
                tracing::warn!(due = %raw, "Unparseable task due date, using now");
            }
            parsed
        })
        .unwrap_or(now);

    let mut task = PendingTask::new(title, due_at);
    task.source_id = text(record, &["id"]);
    task.description = text(record, &["description", "details"]);
    task.field_id = text(record, &["fieldId", "field_id"]);
    task.field_name = text(record, &["fieldName", "field_name"]);
    task.priority = Priority::normalize(text(record, &["priority"]).as_deref());
    task
}

fn project_activity(
    tool_name: &str,
    result: &Map<String, Value>,
    now: DateTime<Utc>,
) -> Result<Projection, ProjectionError> {
    let record = match result.get("activity") {
        Some(Value::Object(inner)) => inner,
        Some(_) => {
            return Err(ProjectionError::MissingActivity {
                tool: tool_name.to_string(),
            });
        }
        None => result,
    };

    let kind = ActivityKind::normalize(text(record, &["type", "activityType"]).as_deref());
    let timestamp = text(record, &["timestamp", "date"])
        .and_then(|raw| parse_date(&raw))
        .unwrap_or(now);

    let mut activity = PendingActivity::new(kind, timestamp);
    activity.source_id = text(record, &["id"]);
    activity.field_id = text(record, &["fieldId", "field_id"]);
    activity.field_name = text(record, &["fieldName", "field_name"]);
    activity.quantity = number(record, "quantity");
    activity.unit = text(record, &["unit"]);
    activity.notes = text(record, &["notes"]);
    Ok(Projection::Activity(activity))
}

/// First non-empty string (or number rendered as text) under any of `keys`.
fn text(record: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match record.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn number(record: &Map<String, Value>, key: &str) -> Option<f64> {
    let quantity = match record.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    quantity.filter(|q| q.is_finite())
}

/// RFC 3339 timestamp or a bare `YYYY-MM-DD` date (midnight UTC).
fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
