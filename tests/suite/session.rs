//! Full turns through the session: stream in, REST out.

use std::cell::Cell;
use std::time::Duration;

use fieldhand_engine::{
    ConfirmationStatus, Notice, PendingAction, Role, SessionOptions, StreamEvent, SyncState,
    Update,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{
    citation_frame, finish_turn, manual_options, mount_chat_stream, mount_create, mount_delete,
    mount_fields, next_settled, run_until, session_for, text_frame, tool_delta_frame,
    tool_result_frame,
};

fn watering_result() -> serde_json::Value {
    json!({
        "activity": {
            "id": "tool-call-7",
            "type": "watering",
            "fieldId": "f1",
            "quantity": 20,
            "unit": "L",
            "timestamp": "2026-04-01T07:30:00Z"
        }
    })
}

#[tokio::test]
async fn hello_world_turn() {
    let server = MockServer::start().await;
    mount_chat_stream(
        &server,
        &[
            text_frame("Hello"),
            text_frame(" world"),
            citation_frame("Orchard guide", "guidebook"),
        ],
    )
    .await;

    let mut session = session_for(&server, &manual_options());
    assert!(session.send("hi"));
    assert!(session.state().is_streaming());

    let updates = finish_turn(&mut session).await;
    assert_eq!(updates.last(), Some(&Update::TurnFinished));
    assert!(!session.state().is_streaming());

    let messages = session.state().conversation().messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role(), Role::User);
    assert_eq!(messages[0].content(), "hi");
    assert_eq!(messages[1].content(), "Hello world");
    assert_eq!(session.state().citations().all().len(), 1);
    assert_eq!(session.state().citations().guidebook().len(), 1);
}

#[tokio::test]
async fn second_message_is_rejected_while_streaming() {
    let server = MockServer::start().await;
    mount_chat_stream(&server, &[text_frame("ok")]).await;

    let mut session = session_for(&server, &manual_options());
    assert!(session.send("first"));
    assert!(!session.send("second"));
    assert_eq!(session.take_notices(), vec![Notice::TurnInFlight]);

    finish_turn(&mut session).await;
    assert_eq!(session.state().conversation().messages().len(), 2);
}

#[tokio::test]
async fn next_turn_sends_history() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/stream"))
        .and(body_partial_json(json!({
            "message": "and tomorrow?",
            "history": [
                {"role": "user", "content": "rain today?"},
                {"role": "assistant", "content": "No rain."}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_string(crate::common::sse_body(&[
            text_frame("Light showers."),
        ])))
        .expect(1)
        .mount(&server)
        .await;
    mount_chat_stream(&server, &[text_frame("No rain.")]).await;

    let mut session = session_for(&server, &manual_options());
    assert!(session.send("rain today?"));
    finish_turn(&mut session).await;
    assert!(session.send("and tomorrow?"));
    finish_turn(&mut session).await;

    let last = session.state().conversation().last_assistant().unwrap();
    assert_eq!(last.content(), "Light showers.");
}

#[tokio::test]
async fn failed_turn_leaves_an_error_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/stream"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let mut session = session_for(&server, &manual_options());
    assert!(session.send("hi"));
    let updates = finish_turn(&mut session).await;
    assert_eq!(updates.last(), Some(&Update::TurnFailed));

    let last = session.state().conversation().messages().last().unwrap();
    assert!(last.is_error());
    assert!(last.content().contains("502"), "{}", last.content());
    assert!(!session.state().is_streaming());
}

#[tokio::test]
async fn logged_activity_is_confirmed_then_undone() {
    let server = MockServer::start().await;
    mount_chat_stream(
        &server,
        &[
            tool_delta_frame("activities.log", "running", "Logging watering"),
            tool_result_frame("activities.log", watering_result()),
            text_frame("Logged 20 L of watering."),
        ],
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/activities"))
        .and(body_partial_json(json!({"type": "watering", "fieldId": "f1", "quantity": 20.0})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "act-42"})))
        .expect(1)
        .mount(&server)
        .await;
    mount_delete(&server, "activities", "act-42").await;

    let mut session = session_for(&server, &manual_options());
    assert!(session.send("I watered the north field with 20 litres"));
    finish_turn(&mut session).await;

    let entry = session.state().board().entries().next().unwrap().clone();
    assert_eq!(entry.status, ConfirmationStatus::Pending);
    assert_eq!(entry.seconds_left(), None);

    session.confirm(entry.key);
    assert_eq!(session.requests_in_flight(), 1);
    let updates = next_settled(&mut session).await;
    assert_eq!(updates.last(), Some(&Update::Settled(entry.key)));

    let saved = session.state().board().get(entry.key).unwrap();
    assert_eq!(saved.status, ConfirmationStatus::Confirmed);
    assert_eq!(saved.server_id.as_deref(), Some("act-42"));
    assert!(saved.can_undo());
    assert!(
        session
            .take_notices()
            .iter()
            .any(|n| matches!(n, Notice::Saved { key, .. } if *key == entry.key))
    );

    session.undo(entry.key);
    assert_eq!(
        session.state().board().get(entry.key).unwrap().sync,
        SyncState::Deleting
    );
    next_settled(&mut session).await;
    assert!(session.state().board().get(entry.key).is_none());
    assert_eq!(
        session.take_notices(),
        vec![Notice::Undone { key: entry.key }]
    );
}

#[tokio::test]
async fn failed_save_can_be_retried() {
    let server = MockServer::start().await;
    mount_chat_stream(
        &server,
        &[tool_result_frame("activities.log", watering_result())],
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/activities"))
        .respond_with(ResponseTemplate::new(500).set_body_string("database locked"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_create(&server, "activities", "act-7").await;

    let mut session = session_for(&server, &manual_options());
    session.send("log it");
    finish_turn(&mut session).await;
    let key = session.state().board().entries().next().unwrap().key;

    session.confirm(key);
    next_settled(&mut session).await;
    let entry = session.state().board().get(key).unwrap();
    assert_eq!(entry.status, ConfirmationStatus::Pending);
    assert!(entry.last_error.is_some());
    assert!(
        session
            .take_notices()
            .iter()
            .any(|n| matches!(n, Notice::ActionFailed { .. }))
    );

    session.retry_last_failed();
    next_settled(&mut session).await;
    let entry = session.state().board().get(key).unwrap();
    assert_eq!(entry.status, ConfirmationStatus::Confirmed);
    assert_eq!(entry.server_id.as_deref(), Some("act-7"));
    assert_eq!(entry.last_error, None);
}

#[tokio::test]
async fn countdown_confirms_after_the_configured_ticks() {
    let server = MockServer::start().await;
    mount_chat_stream(
        &server,
        &[tool_result_frame("activities.log", watering_result())],
    )
    .await;
    mount_create(&server, "activities", "act-9").await;

    let options = SessionOptions {
        auto_confirm_secs: 3,
        auto_confirm: true,
        tick: Duration::from_millis(20),
    };
    let mut session = session_for(&server, &options);
    session.send("log it");

    let updates = next_settled(&mut session).await;
    let projected_at = updates
        .iter()
        .position(|u| matches!(u, Update::Stream(StreamEvent::ToolCallResult { .. })))
        .unwrap();
    let ticks = updates[projected_at..]
        .iter()
        .filter(|u| matches!(u, Update::Tick))
        .count();
    assert!(ticks >= 3, "confirmed after {ticks} ticks: {updates:?}");

    let key = session.state().board().entries().next().unwrap().key;
    let entry = session.state().board().get(key).unwrap();
    assert_eq!(entry.status, ConfirmationStatus::Confirmed);
    assert_eq!(entry.server_id.as_deref(), Some("act-9"));
}

#[tokio::test]
async fn cancelled_entry_never_reaches_the_server() {
    let server = MockServer::start().await;
    mount_chat_stream(
        &server,
        &[tool_result_frame("activities.log", watering_result())],
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/activities"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let options = SessionOptions {
        auto_confirm_secs: 20,
        auto_confirm: true,
        tick: Duration::from_millis(10),
    };
    let mut session = session_for(&server, &options);
    session.send("log it");
    finish_turn(&mut session).await;
    let key = session.state().board().entries().next().unwrap().key;
    assert_eq!(
        session.state().board().get(key).unwrap().status,
        ConfirmationStatus::Pending
    );

    session.cancel(key);
    let ticks = Cell::new(0);
    run_until(&mut session, |u| {
        if matches!(u, Update::Tick) {
            ticks.set(ticks.get() + 1);
        }
        ticks.get() >= 30
    })
    .await;

    assert_eq!(
        session.state().board().get(key).unwrap().status,
        ConfirmationStatus::Cancelled
    );
    assert_eq!(session.requests_in_flight(), 0);
}

#[tokio::test]
async fn scheduled_tasks_are_broadcast_and_queued() {
    let server = MockServer::start().await;
    mount_chat_stream(
        &server,
        &[tool_result_frame(
            "command_bus.schedule_task",
            json!({"tasks": [
                {"title": "Scout for aphids", "dueAt": "2026-04-03T08:00:00Z", "priority": "high"},
                {"title": "Check drip line", "dueDate": "2026-04-04"}
            ]}),
        )],
    )
    .await;

    let mut session = session_for(&server, &manual_options());
    let mut tasks_rx = session.subscribe_tasks();
    session.send("plan my week");
    finish_turn(&mut session).await;

    let tasks = tasks_rx.try_recv().unwrap();
    let titles: Vec<&str> = tasks.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(titles, vec!["Scout for aphids", "Check drip line"]);

    let queued: Vec<&str> = session
        .state()
        .board()
        .entries()
        .map(|e| e.action.label())
        .collect();
    assert_eq!(queued, vec!["Scout for aphids", "Check drip line"]);
}

#[tokio::test]
async fn field_directory_names_pending_entries() {
    let server = MockServer::start().await;
    mount_fields(&server, json!({"fields": [{"id": "f1", "name": "North orchard"}]})).await;
    mount_chat_stream(
        &server,
        &[tool_result_frame("activities.log", watering_result())],
    )
    .await;

    let mut session = session_for(&server, &manual_options());
    assert_eq!(session.load_fields().await.unwrap(), 1);
    session.send("log it");
    let updates = finish_turn(&mut session).await;
    assert!(
        updates
            .iter()
            .any(|u| matches!(u, Update::Stream(StreamEvent::ToolCallResult { .. })))
    );

    let entry = session.state().board().entries().next().unwrap();
    let PendingAction::Activity(activity) = &entry.action else {
        panic!("expected an activity");
    };
    assert_eq!(activity.field_name.as_deref(), Some("North orchard"));
}

#[tokio::test]
async fn tool_progress_is_tracked_during_the_turn() {
    let server = MockServer::start().await;
    mount_chat_stream(
        &server,
        &[
            tool_delta_frame("weather.forecast", "running", "Checking the forecast"),
            text_frame("Dry all week."),
        ],
    )
    .await;

    let mut session = session_for(&server, &manual_options());
    session.send("weather?");
    run_until(&mut session, |u| {
        matches!(u, Update::Stream(StreamEvent::ToolCallDelta { .. }))
    })
    .await;

    let status = session.state().agent_status().unwrap();
    assert_eq!(status.thinking, "Checking the forecast");
    assert_eq!(
        session.state().active_tool().map(|t| t.tool.as_str()),
        Some("weather.forecast")
    );

    finish_turn(&mut session).await;
    assert!(session.state().agent_status().is_none());
}
