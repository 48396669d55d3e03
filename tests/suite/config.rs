//! Config file to working session.

use std::io::Write;
use std::sync::Arc;

use fieldhand_engine::{
    BASE_URL_ENV, ChatClient, FieldhandConfig, HttpFarmApi, Session, Update,
};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{finish_turn, sse_body, text_frame};

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn config_file_drives_endpoint_token_and_confirmation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/agent/chat"))
        .and(header("authorization", "Bearer from-file"))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&[text_frame("Hi!")])))
        .expect(1)
        .mount(&server)
        .await;

    let file = write_config(&format!(
        r#"
[server]
base_url = "{}/"
chat_path = "agent/chat"
api_token = "from-file"

[confirmation]
auto_confirm_secs = 5
auto_confirm = false

[retry]
max_retries = 0
"#,
        server.uri()
    ));
    let config = FieldhandConfig::load_from(file.path()).unwrap();
    let resolved = config.resolve_with(|_| None);

    assert_eq!(resolved.client.chat_url(), format!("{}/agent/chat", server.uri()));
    assert_eq!(resolved.session.auto_confirm_secs, 5);
    assert!(!resolved.session.auto_confirm);

    let api = Arc::new(HttpFarmApi::new(&resolved.client));
    let mut session = Session::new(ChatClient::new(resolved.client.clone()), api, &resolved.session);
    session.send("hello");
    let updates = finish_turn(&mut session).await;
    assert_eq!(updates.last(), Some(&Update::TurnFinished));
    assert_eq!(
        session.state().conversation().last_assistant().unwrap().content(),
        "Hi!"
    );
}

#[test]
fn environment_base_url_wins_over_file() {
    let file = write_config("[server]\nbase_url = \"http://file.example/api\"\n");
    let config = FieldhandConfig::load_from(file.path()).unwrap();

    let resolved = config.resolve_with(|name| {
        (name == BASE_URL_ENV).then(|| "http://env.example/api".to_string())
    });
    assert_eq!(resolved.client.base_url(), "http://env.example/api");
}

#[test]
fn broken_config_reports_its_path() {
    let file = write_config("[server\nbase_url = 1");
    let err = FieldhandConfig::load_from(file.path()).unwrap_err();
    assert_eq!(err.path(), &file.path().to_path_buf());
}
