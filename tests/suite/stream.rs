//! Chat stream transport over real HTTP.

use fieldhand_client::{ChatClient, ChatRequest, StreamError, StreamSignal};
use fieldhand_engine::{STREAM_ERROR_BADGE, format_stream_error};
use fieldhand_types::{CitationKind, StreamEvent, ToolStatus};
use serde_json::json;
use tokio::sync::mpsc;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{
    CHAT_PATH, citation_frame, client_config, mount_chat_stream, mount_raw_chat_stream, sse_body,
    text_frame, tool_delta_frame,
};

async fn collect(client: &ChatClient, message: &str) -> Vec<StreamSignal> {
    let (tx, mut rx) = mpsc::channel(64);
    let request = ChatRequest {
        message: message.to_string(),
        history: Vec::new(),
    };
    client.stream_turn(&request, tx).await;

    let mut signals = Vec::new();
    while let Some(signal) = rx.recv().await {
        signals.push(signal);
    }
    signals
}

#[tokio::test]
async fn streams_text_then_finishes() {
    let server = MockServer::start().await;
    mount_chat_stream(&server, &[text_frame("Hello "), text_frame("world")]).await;

    let client = ChatClient::new(client_config(&server));
    let signals = collect(&client, "hi").await;

    assert_eq!(
        signals,
        vec![
            StreamSignal::Event(StreamEvent::message_delta("Hello ")),
            StreamSignal::Event(StreamEvent::message_delta("world")),
            StreamSignal::Finished,
        ]
    );
}

#[tokio::test]
async fn request_carries_message_and_accepts_event_stream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .and(header("accept", "text/event-stream"))
        .and(body_partial_json(json!({"message": "when should I water?"})))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&[text_frame("ok")])))
        .expect(1)
        .mount(&server)
        .await;

    let client = ChatClient::new(client_config(&server));
    let signals = collect(&client, "when should I water?").await;
    assert_eq!(signals.last(), Some(&StreamSignal::Finished));
}

#[tokio::test]
async fn malformed_frame_is_skipped_without_ending_the_stream() {
    let server = MockServer::start().await;
    let body = format!(
        "data: {}\n\ndata: {{\"type\": \"thread_item.delta\", \"delta\": \n\nevent: ping\n\ndata: {}\n\ndata: {}\n\n",
        text_frame("before"),
        tool_delta_frame("weather.forecast", "running", "Checking the forecast"),
        citation_frame("Orchard guide", "guidebook"),
    );
    mount_raw_chat_stream(&server, body).await;

    let client = ChatClient::new(client_config(&server));
    let signals = collect(&client, "hi").await;

    assert_eq!(signals.len(), 4, "{signals:?}");
    assert_eq!(
        signals[0],
        StreamSignal::Event(StreamEvent::message_delta("before"))
    );
    match &signals[1] {
        StreamSignal::Event(StreamEvent::ToolCallDelta {
            tool,
            status,
            message,
            ..
        }) => {
            assert_eq!(tool, "weather.forecast");
            assert_eq!(*status, ToolStatus::Running);
            assert_eq!(message.as_deref(), Some("Checking the forecast"));
        }
        other => panic!("expected tool delta, got {other:?}"),
    }
    match &signals[2] {
        StreamSignal::Event(StreamEvent::Citation(citation)) => {
            assert_eq!(citation.source, "Orchard guide");
            assert_eq!(citation.kind, CitationKind::Guidebook);
        }
        other => panic!("expected citation, got {other:?}"),
    }
    assert_eq!(signals[3], StreamSignal::Finished);
}

#[tokio::test]
async fn unterminated_trailing_frame_is_dropped() {
    let server = MockServer::start().await;
    let body = format!("data: {}\n\ndata: {}", text_frame("kept"), text_frame("lost"));
    mount_raw_chat_stream(&server, body).await;

    let client = ChatClient::new(client_config(&server));
    let signals = collect(&client, "hi").await;

    assert_eq!(
        signals,
        vec![
            StreamSignal::Event(StreamEvent::message_delta("kept")),
            StreamSignal::Finished,
        ]
    );
}

#[tokio::test]
async fn server_error_is_a_single_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": {"message": "agent crashed"}})))
        .mount(&server)
        .await;

    let client = ChatClient::new(client_config(&server));
    let signals = collect(&client, "hi").await;

    assert_eq!(signals.len(), 1);
    let StreamSignal::Failed(error) = &signals[0] else {
        panic!("expected failure, got {signals:?}");
    };
    assert!(matches!(error, StreamError::Status { status: 500, .. }));

    let rendered = format_stream_error(error);
    assert!(rendered.starts_with(STREAM_ERROR_BADGE));
    assert!(rendered.contains("agent crashed"), "{rendered}");
}

#[tokio::test]
async fn unauthorized_error_points_at_the_config_file() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
        .mount(&server)
        .await;

    let client = ChatClient::new(client_config(&server).with_api_token(Some("stale-token".to_string())));
    let signals = collect(&client, "hi").await;

    let Some(StreamSignal::Failed(error)) = signals.first() else {
        panic!("expected failure, got {signals:?}");
    };
    let rendered = format_stream_error(error);
    assert!(rendered.contains("api_token"), "{rendered}");
}

#[tokio::test]
async fn bearer_token_is_sent_when_configured() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .and(header("authorization", "Bearer farm-secret"))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&[text_frame("ok")])))
        .expect(1)
        .mount(&server)
        .await;

    let client = ChatClient::new(client_config(&server).with_api_token(Some("farm-secret".to_string())));
    let signals = collect(&client, "hi").await;
    assert_eq!(signals.last(), Some(&StreamSignal::Finished));
}
