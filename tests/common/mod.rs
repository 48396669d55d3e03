//! Shared test utilities and fixtures
//!
//! A wiremock server stands in for both the agent runtime (chat stream) and
//! the dashboard REST API.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use fieldhand_client::ClientConfig;
use fieldhand_client::retry::RetryConfig;
use fieldhand_engine::{ChatClient, HttpFarmApi, Session, SessionOptions, Update};
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const CHAT_PATH: &str = "/chat/stream";

/// Upper bound for any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(10);

pub fn text_frame(text: &str) -> Value {
    json!({
        "type": "thread_item.delta",
        "delta": {"content": [{"type": "output_text", "text": text}]}
    })
}

pub fn tool_delta_frame(tool: &str, status: &str, message: &str) -> Value {
    json!({
        "type": "tool_call_delta",
        "delta": {"tool": tool, "status": status, "message": message}
    })
}

pub fn tool_result_frame(tool: &str, result: Value) -> Value {
    json!({"type": "tool_call_result", "toolName": tool, "result": result})
}

pub fn citation_frame(source: &str, kind: &str) -> Value {
    json!({
        "type": "citation",
        "citation": {"source": source, "confidence": 0.9, "type": kind}
    })
}

/// Serialize frames as `data:` lines separated by blank lines.
pub fn sse_body(frames: &[Value]) -> String {
    let mut body = String::new();
    for frame in frames {
        body.push_str(&format!("data: {frame}\n\n"));
    }
    body
}

pub async fn mount_chat_stream(server: &MockServer, frames: &[Value]) {
    mount_raw_chat_stream(server, sse_body(frames)).await;
}

pub async fn mount_raw_chat_stream(server: &MockServer, body: String) {
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("content-type", "text/event-stream"),
        )
        .mount(server)
        .await;
}

pub async fn mount_fields(server: &MockServer, fields: Value) {
    Mock::given(method("GET"))
        .and(path("/fields"))
        .respond_with(ResponseTemplate::new(200).set_body_json(fields))
        .mount(server)
        .await;
}

pub async fn mount_create(server: &MockServer, collection: &str, id: &str) {
    Mock::given(method("POST"))
        .and(path(format!("/{collection}")))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": id})))
        .mount(server)
        .await;
}

pub async fn mount_delete(server: &MockServer, collection: &str, id: &str) {
    Mock::given(method("DELETE"))
        .and(path(format!("/{collection}/{id}")))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(server)
        .await;
}

pub fn client_config(server: &MockServer) -> ClientConfig {
    ClientConfig::new(server.uri()).with_retry(RetryConfig::none())
}

pub fn session_for(server: &MockServer, options: &SessionOptions) -> Session {
    let config = client_config(server);
    let api = Arc::new(HttpFarmApi::new(&config));
    Session::new(ChatClient::new(config), api, options)
}

/// Manual confirmation only, so tests decide when requests go out.
pub fn manual_options() -> SessionOptions {
    SessionOptions {
        auto_confirm: false,
        ..SessionOptions::default()
    }
}

/// Drive the session until `done` matches an update; returns every update seen.
pub async fn run_until(session: &mut Session, done: impl Fn(&Update) -> bool) -> Vec<Update> {
    let mut seen = Vec::new();
    let result = tokio::time::timeout(WAIT, async {
        loop {
            let update = session.next_update().await;
            let finished = done(&update);
            seen.push(update);
            if finished {
                break;
            }
        }
    })
    .await;
    assert!(result.is_ok(), "timed out; updates so far: {seen:?}");
    seen
}

pub async fn finish_turn(session: &mut Session) -> Vec<Update> {
    run_until(session, |u| {
        matches!(u, Update::TurnFinished | Update::TurnFailed)
    })
    .await
}

pub async fn next_settled(session: &mut Session) -> Vec<Update> {
    run_until(session, |u| matches!(u, Update::Settled(_))).await
}
