//! Error formatting for failed turns.
//!
//! Turns a [`StreamError`] into the text of the synthetic assistant message
//! that replaces the unfinished reply.

use std::fmt::Write;

use fieldhand_client::StreamError;
use fieldhand_types::truncate_with_ellipsis;
use serde_json::Value;

pub const STREAM_ERROR_BADGE: &str = "[Stream error]";

const DETAIL_MAX_CHARS: usize = 200;

/// Pull a human message out of a JSON error body, if it is one.
#[must_use]
pub fn extract_error_message(body: &str) -> Option<String> {
    let payload: Value = serde_json::from_str(body.trim()).ok()?;
    payload
        .pointer("/error/message")
        .and_then(Value::as_str)
        .or_else(|| payload.pointer("/error").and_then(Value::as_str))
        .or_else(|| payload.pointer("/message").and_then(Value::as_str))
        .or_else(|| payload.pointer("/detail").and_then(Value::as_str))
        .or_else(|| payload.as_str())
        .map(ToString::to_string)
}

#[must_use]
pub fn is_auth_status(status: u16) -> bool {
    matches!(status, 401 | 403)
}

#[must_use]
pub fn format_stream_error(err: &StreamError) -> String {
    let mut content = String::from(STREAM_ERROR_BADGE);
    content.push_str("\n\n");

    let detail = match err {
        StreamError::Status { status, body } if is_auth_status(*status) => {
            let _ = write!(content, "The assistant rejected our credentials ({status}).");
            let config_hint = crate::config::config_path().map_or_else(
                || "~/.fieldhand/config.toml".to_string(),
                |p| p.display().to_string(),
            );
            let _ = write!(
                content,
                "\n\nFix:\n- Set api_token under [server] in {config_hint}.\n- Then retry your message."
            );
            extract_error_message(body)
        }
        StreamError::Status { status, body } => {
            let _ = write!(content, "Request failed ({status}).");
            Some(extract_error_message(body).unwrap_or_else(|| body.trim().to_string()))
        }
        StreamError::IdleTimeout(after) => {
            let _ = write!(
                content,
                "The assistant stopped responding for {}s.",
                after.as_secs()
            );
            None
        }
        StreamError::Connect { .. } => {
            content.push_str("Could not reach the assistant.");
            Some(err.to_string())
        }
        StreamError::Read(_) | StreamError::Frame(_) => {
            content.push_str("The response was interrupted.");
            Some(err.to_string())
        }
    };

    if let Some(detail) = detail.filter(|d| !d.trim().is_empty()) {
        content.push_str("\n\nDetails: ");
        content.push_str(&truncate_with_ellipsis(detail.trim(), DETAIL_MAX_CHARS));
    }
    content
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn extracts_nested_error_message() {
        assert_eq!(
            extract_error_message(r#"{"error":{"message":"quota exceeded"}}"#).as_deref(),
            Some("quota exceeded")
        );
        assert_eq!(
            extract_error_message(r#"{"detail":"bad field"}"#).as_deref(),
            Some("bad field")
        );
        assert_eq!(extract_error_message("<html>"), None);
    }

    #[test]
    fn status_error_includes_code_and_detail() {
        let text = format_stream_error(&StreamError::Status {
            status: 502,
            body: r#"{"message":"upstream agent crashed"}"#.to_string(),
        });
        assert!(text.starts_with(STREAM_ERROR_BADGE));
        assert!(text.contains("Request failed (502)."));
        assert!(text.contains("Details: upstream agent crashed"));
    }

    #[test]
    fn auth_error_points_at_config() {
        let text = format_stream_error(&StreamError::Status {
            status: 401,
            body: String::new(),
        });
        assert!(text.contains("api_token"));
        assert!(!text.contains("Details:"));
    }

    #[test]
    fn idle_timeout_has_no_details() {
        let text = format_stream_error(&StreamError::IdleTimeout(Duration::from_secs(60)));
        assert!(text.contains("60s"));
        assert!(!text.contains("Details:"));
    }

    #[test]
    fn long_details_are_truncated() {
        let text = format_stream_error(&StreamError::Read("x".repeat(1000)));
        let details = text.split("Details: ").nth(1).unwrap();
        assert_eq!(details.chars().count(), DETAIL_MAX_CHARS);
    }
}
