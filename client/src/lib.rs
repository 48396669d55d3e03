//! Transport layer for the Fieldhand assistant panel.
//!
//! # Architecture
//!
//! - [`ChatClient::stream_turn`] - opens one streaming chat response per user turn
//! - [`frame`] - [`StreamFrameReader`] reassembles newline-delimited frames across chunks
//! - [`decode`] - [`EventDecoder`] turns each `data:` frame into a typed [`StreamEvent`]
//! - [`api`] - the farm REST collaborators (`/fields`, `/activities`, `/tasks`)
//! - [`retry`] - backoff policy shared by every outbound request
//!
//! A turn's output is delivered as [`StreamSignal`]s through a
//! [`tokio::sync::mpsc::Sender`], in arrival order, ending with exactly one
//! `Finished` or `Failed`.
//!
//! # Error Handling
//!
//! Malformed frames are skipped inside the decoder and never surface here.
//! Anything that stops the byte stream itself (connect failure, non-2xx status,
//! mid-stream read error, idle timeout, oversized frame) is a [`StreamError`]
//! delivered as `StreamSignal::Failed`; no partial-turn retry is attempted.

pub mod api;
pub mod decode;
pub mod frame;
pub mod retry;
pub mod wire;

use std::fmt::Display;
use std::sync::OnceLock;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;

pub use api::{ApiError, ApiFut, CreatedRecord, FarmApi, HttpFarmApi};
pub use decode::EventDecoder;
pub use fieldhand_types;
pub use fieldhand_types::StreamEvent;
pub use frame::{FrameError, StreamFrameReader};

const CONNECT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_STREAM_IDLE_TIMEOUT_SECS: u64 = 60;
const TCP_KEEPALIVE_SECS: u64 = 60;
const POOL_MAX_IDLE_PER_HOST: usize = 16;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;
const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

pub const DEFAULT_CHAT_PATH: &str = "/chat/stream";

pub fn http_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        base_client_builder().build().unwrap_or_else(|e| {
            tracing::error!("Failed to build tuned HTTP client: {e}. Falling back to defaults.");
            reqwest::Client::new()
        })
    })
}

fn base_client_builder() -> reqwest::ClientBuilder {
    use reqwest::header::{HeaderMap, HeaderValue};

    let mut default_headers = HeaderMap::new();
    default_headers.insert(
        "X-Client",
        HeaderValue::from_static(concat!("fieldhand/", env!("CARGO_PKG_VERSION"))),
    );

    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .tcp_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS)))
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(Some(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS)))
        .default_headers(default_headers)
}

/// Endpoint and tuning knobs for the transport.
///
/// ```rust
/// use std::time::Duration;
/// use fieldhand_client::ClientConfig;
///
/// let config = ClientConfig::new("http://localhost:8080/api")
///     .with_chat_path("/assistant/stream")
///     .with_idle_timeout(Duration::from_secs(30));
/// assert_eq!(config.chat_url(), "http://localhost:8080/api/assistant/stream");
/// ```
#[derive(Clone)]
pub struct ClientConfig {
    base_url: String,
    chat_path: String,
    api_token: Option<String>,
    idle_timeout: Duration,
    retry: retry::RetryConfig,
}

// Manual Debug impl to keep the token out of logs.
impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("chat_path", &self.chat_path)
            .field(
                "api_token",
                &if self.api_token.is_some() { "[REDACTED]" } else { "None" },
            )
            .field("idle_timeout", &self.idle_timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

impl ClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            chat_path: DEFAULT_CHAT_PATH.to_string(),
            api_token: None,
            idle_timeout: Duration::from_secs(DEFAULT_STREAM_IDLE_TIMEOUT_SECS),
            retry: retry::RetryConfig::default(),
        }
    }

    #[must_use]
    pub fn with_chat_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.chat_path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        self
    }

    #[must_use]
    pub fn with_api_token(mut self, token: Option<String>) -> Self {
        self.api_token = token.filter(|t| !t.trim().is_empty());
        self
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.idle_timeout = timeout;
        }
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: retry::RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn chat_url(&self) -> String {
        format!("{}{}", self.base_url, self.chat_path)
    }

    #[must_use]
    pub fn api_token(&self) -> Option<&str> {
        self.api_token.as_deref()
    }

    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    #[must_use]
    pub fn retry(&self) -> &retry::RetryConfig {
        &self.retry
    }
}

/// Fatal failure of one turn's stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("Request failed after {attempts} attempts: {message}")]
    Connect { attempts: u32, message: String },
    #[error("API error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Stream read failed: {0}")]
    Read(String),
    #[error("Stream idle timeout after {0:?}")]
    IdleTimeout(Duration),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamSignal {
    Event(StreamEvent),
    /// The response body closed normally.
    Finished,
    Failed(StreamError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub role: &'static str,
    pub content: String,
}

/// Body of the POST that opens a turn's stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl ChatClient {
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self {
            http: http_client().clone(),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Run one turn: open the stream and forward everything it yields to `tx`.
    ///
    /// Returns once a terminal signal was sent or the receiver went away.
    pub async fn stream_turn(&self, request: &ChatRequest, tx: mpsc::Sender<StreamSignal>) {
        let url = self.config.chat_url();
        let build = || {
            let builder = self
                .http
                .post(&url)
                .header(reqwest::header::ACCEPT, "text/event-stream")
                .json(request);
            match self.config.api_token() {
                Some(token) => builder.bearer_auth(token),
                None => builder,
            }
        };

        let outcome = retry::send_with_retry(build, self.config.retry()).await;
        let response = match open_response(outcome).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, url = %url, "Failed to open chat stream");
                let _ = send_signal(&tx, StreamSignal::Failed(e)).await;
                return;
            }
        };

        tracing::debug!(url = %url, "Chat stream opened");
        process_chat_stream(response.bytes_stream(), &tx, self.config.idle_timeout()).await;
    }
}

async fn open_response(outcome: retry::RetryOutcome) -> Result<reqwest::Response, StreamError> {
    match outcome {
        retry::RetryOutcome::Success(response) => Ok(response),
        retry::RetryOutcome::HttpError(response) => {
            let status = response.status().as_u16();
            let body = read_capped_error_body(response).await;
            Err(StreamError::Status { status, body })
        }
        retry::RetryOutcome::ConnectionError { attempts, source } => Err(StreamError::Connect {
            attempts,
            message: source.to_string(),
        }),
        retry::RetryOutcome::NonRetryable(e) => Err(StreamError::Connect {
            attempts: 1,
            message: e.to_string(),
        }),
    }
}

async fn send_signal(tx: &mpsc::Sender<StreamSignal>, signal: StreamSignal) -> bool {
    tx.send(signal).await.is_ok()
}

/// Drive a byte stream through frame reassembly and decoding.
///
/// Handles:
/// - idle timeout between chunks
/// - frame reassembly across arbitrary chunk boundaries
/// - malformed frames (skipped by the decoder)
/// - transport errors mid-read (fatal, reported once)
///
/// An unterminated trailing frame at end of stream is discarded.
pub async fn process_chat_stream<S, B, E>(
    stream: S,
    tx: &mpsc::Sender<StreamSignal>,
    idle_timeout: Duration,
) where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut stream = std::pin::pin!(stream);
    let mut reader = StreamFrameReader::new();
    let mut decoder = EventDecoder::new();

    loop {
        let Ok(next) = tokio::time::timeout(idle_timeout, stream.next()).await else {
            let _ = send_signal(tx, StreamSignal::Failed(StreamError::IdleTimeout(idle_timeout)))
                .await;
            return;
        };

        let Some(chunk) = next else { break };
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(error = %e, "Chat stream read failed");
                let _ = send_signal(tx, StreamSignal::Failed(StreamError::Read(e.to_string())))
                    .await;
                return;
            }
        };

        let lines = match reader.push(chunk.as_ref()) {
            Ok(lines) => lines,
            Err(e) => {
                let _ = send_signal(tx, StreamSignal::Failed(e.into())).await;
                return;
            }
        };

        for line in lines {
            if let Some(event) = decoder.decode_line(&line)
                && !send_signal(tx, StreamSignal::Event(event)).await
            {
                return;
            }
        }
    }

    reader.finish();
    tracing::debug!(
        decoded = decoder.decoded(),
        skipped = decoder.skipped(),
        "Chat stream closed"
    );
    let _ = send_signal(tx, StreamSignal::Finished).await;
}

pub async fn read_capped_error_body(response: reqwest::Response) -> String {
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            let text = String::from_utf8_lossy(&body);
            return format!("{text}...(truncated)");
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}
