//! Mapping queued operations to HTTP requests.

use reqwest::Method;
use serde_json::Value;
use thiserror::Error;

use crate::queue::QueuedOperation;

/// A concrete request for one queued operation.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRequest {
    pub method: Method,
    /// Path relative to the server base URL, e.g. `/api/entities/tasks`.
    pub path: String,
    pub body: Option<Value>,
}

impl SyncRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// The operation cannot be turned into a request. Reported as a
/// validation failure; nothing is sent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Unknown operation type: {0}")]
    UnknownKind(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

/// Domain hook deciding what each operation type means on the wire.
pub trait RequestResolver: Send + Sync {
    fn resolve(&self, operation: &QueuedOperation) -> Result<SyncRequest, ResolveError>;
}
