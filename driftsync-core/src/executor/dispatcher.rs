//! Sending sync requests.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use super::request::SyncRequest;
use crate::hlc::HlcTimestamp;
use crate::queue::QueuedOperation;

/// Header carrying an HLC timestamp, in both directions.
pub const HLC_HEADER: &str = "X-HLC";
/// Header carrying the operation ID so the server can drop replays.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Plain-text bodies longer than this are not used as error messages.
const MAX_TEXT_MESSAGE_LEN: usize = 200;

/// Transport-level failure: no response was received.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,
}

/// Whatever the server answered, success or not.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResponse {
    pub status: u16,
    pub server_hlc: Option<HlcTimestamp>,
    pub body: String,
}

#[async_trait]
pub trait RequestDispatcher: Send + Sync {
    /// Sends one request. `hlc` is the client timestamp for this attempt.
    async fn dispatch(
        &self,
        operation: &QueuedOperation,
        request: &SyncRequest,
        hlc: &HlcTimestamp,
    ) -> Result<DispatchResponse, DispatchError>;
}

/// Dispatcher over HTTP using reqwest.
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpDispatcher {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, api_key)
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl RequestDispatcher for HttpDispatcher {
    async fn dispatch(
        &self,
        operation: &QueuedOperation,
        request: &SyncRequest,
        hlc: &HlcTimestamp,
    ) -> Result<DispatchResponse, DispatchError> {
        let mut builder = self
            .client
            .request(request.method.clone(), self.url(&request.path))
            .header(IDEMPOTENCY_KEY_HEADER, &operation.id)
            .header(HLC_HEADER, hlc.to_string());

        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(transport_error)?;

        let status = response.status().as_u16();
        let server_hlc = response
            .headers()
            .get(HLC_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| match v.parse::<HlcTimestamp>() {
                Ok(ts) => Some(ts),
                Err(e) => {
                    tracing::warn!(value = v, "Ignoring malformed {} header: {}", HLC_HEADER, e);
                    None
                }
            });
        let body = response.text().await.map_err(transport_error)?;

        Ok(DispatchResponse {
            status,
            server_hlc,
            body,
        })
    }
}

fn transport_error(e: reqwest::Error) -> DispatchError {
    if e.is_timeout() {
        DispatchError::Timeout
    } else {
        DispatchError::Network(e.to_string())
    }
}

/// Picks a human-readable message out of an error response body.
///
/// JSON bodies are searched for `message`, `error`, `detail`,
/// `statusMessage` and `errors[0].message`, in that order. A short
/// non-JSON body is used as is. Otherwise the status is reported.
pub fn extract_message(body: &str, status: u16) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        return json_message(&json).unwrap_or_else(|| format!("HTTP {}", status));
    }

    let text = body.trim();
    if !text.is_empty() && text.len() <= MAX_TEXT_MESSAGE_LEN {
        text.to_string()
    } else {
        format!("HTTP {}", status)
    }
}

fn json_message(json: &Value) -> Option<String> {
    fn non_empty(value: Option<&Value>) -> Option<String> {
        value
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    for field in ["message", "error", "detail", "statusMessage"] {
        if let Some(text) = non_empty(json.get(field)) {
            return Some(text);
        }
    }

    // {"error": {"message": "..."}}
    if let Some(text) = non_empty(json.get("error").and_then(|e| e.get("message"))) {
        return Some(text);
    }

    non_empty(
        json.get("errors")
            .and_then(|e| e.get(0))
            .and_then(|e| e.get("message")),
    )
}
