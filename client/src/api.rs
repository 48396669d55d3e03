//! REST collaborators of the confirmation pipeline.
//!
//! The board never talks HTTP itself: it emits create/delete effects and the
//! session executes them through a [`FarmApi`]. Tests substitute their own
//! implementation or point [`HttpFarmApi`] at a mock server.

use std::future::Future;
use std::pin::Pin;

use fieldhand_types::{Field, RecordKind};
use serde::Deserialize;
use serde_json::Value;

use crate::retry::{self, RetryConfig, RetryOutcome};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected response body: {0}")]
    Decode(String),
    #[error("could not encode request body: {0}")]
    Encode(String),
}

pub type ApiFut<'a, T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send + 'a>>;

/// Record returned by a create call.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedRecord {
    /// Server-assigned identifier. The only id undo may use.
    pub id: Option<String>,
    pub body: Value,
}

impl CreatedRecord {
    #[must_use]
    pub fn from_body(body: Value) -> Self {
        let id = match body.get("id") {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        Self { id, body }
    }
}

pub trait FarmApi: Send + Sync {
    fn list_fields(&self) -> ApiFut<'_, Vec<Field>>;

    fn create(&self, kind: RecordKind, body: Value) -> ApiFut<'_, CreatedRecord>;

    fn delete<'a>(&'a self, kind: RecordKind, id: &'a str) -> ApiFut<'a, ()>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FieldList {
    Bare(Vec<Field>),
    Wrapped { fields: Vec<Field> },
}

impl FieldList {
    fn into_fields(self) -> Vec<Field> {
        match self {
            Self::Bare(fields) | Self::Wrapped { fields } => fields,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpFarmApi {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    retry: RetryConfig,
}

impl HttpFarmApi {
    #[must_use]
    pub fn new(config: &crate::ClientConfig) -> Self {
        Self {
            http: crate::http_client().clone(),
            base_url: config.base_url().to_string(),
            token: config.api_token().map(str::to_string),
            retry: config.retry().clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn execute<F>(&self, build: F) -> Result<reqwest::Response, ApiError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        match retry::send_with_retry(|| self.authorize(build()), &self.retry).await {
            RetryOutcome::Success(response) => Ok(response),
            RetryOutcome::HttpError(response) => {
                let status = response.status().as_u16();
                let body = crate::read_capped_error_body(response).await;
                Err(ApiError::Status { status, body })
            }
            RetryOutcome::ConnectionError { source, .. } | RetryOutcome::NonRetryable(source) => {
                Err(ApiError::Request(source.to_string()))
            }
        }
    }
}

impl FarmApi for HttpFarmApi {
    fn list_fields(&self) -> ApiFut<'_, Vec<Field>> {
        Box::pin(async move {
            let url = self.url("/fields");
            let response = self.execute(|| self.http.get(&url)).await?;
            let list: FieldList = response
                .json()
                .await
                .map_err(|e| ApiError::Decode(e.to_string()))?;
            let fields = list.into_fields();
            tracing::debug!(count = fields.len(), "Loaded field directory");
            Ok(fields)
        })
    }

    fn create(&self, kind: RecordKind, body: Value) -> ApiFut<'_, CreatedRecord> {
        Box::pin(async move {
            let url = self.url(&format!("/{}", kind.collection()));
            let response = self.execute(|| self.http.post(&url).json(&body)).await?;
            let text = response
                .text()
                .await
                .map_err(|e| ApiError::Decode(e.to_string()))?;
            let value = if text.trim().is_empty() {
                Value::Null
            } else {
                serde_json::from_str(&text).map_err(|e| ApiError::Decode(e.to_string()))?
            };
            let record = CreatedRecord::from_body(value);
            tracing::info!(
                collection = kind.collection(),
                id = record.id.as_deref().unwrap_or("<none>"),
                "Created record"
            );
            Ok(record)
        })
    }

    fn delete<'a>(&'a self, kind: RecordKind, id: &'a str) -> ApiFut<'a, ()> {
        Box::pin(async move {
            let url = self.url(&format!("/{}/{id}", kind.collection()));
            self.execute(|| self.http.delete(&url)).await?;
            tracing::info!(collection = kind.collection(), id, "Deleted record");
            Ok(())
        })
    }
}
