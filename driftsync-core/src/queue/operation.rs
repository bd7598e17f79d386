//! Queued operation types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorKind;
use crate::hlc::HlcTimestamp;

/// Client-generated operation ID. Doubles as the idempotency key sent to the
/// server.
pub type OperationId = String;

/// Lifecycle of a queued operation.
///
/// ```text
/// pending -> syncing -> synced (removed)
///                    -> conflict (terminal)
///                    -> pending (transient failure, below the retry cap)
///                    -> failed (terminal after the cap, or not retryable)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Syncing,
    Failed,
    Conflict,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Syncing => "syncing",
            OperationStatus::Failed => "failed",
            OperationStatus::Conflict => "conflict",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(OperationStatus::Pending),
            "syncing" => Ok(OperationStatus::Syncing),
            "failed" => Ok(OperationStatus::Failed),
            "conflict" => Ok(OperationStatus::Conflict),
            other => Err(format!("Unknown operation status: {}", other)),
        }
    }
}

/// An operation waiting in the offline queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
    pub id: OperationId,
    /// Domain operation tag, e.g. `task.create`. Opaque to the core.
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
    /// Enqueue time; sync order is ascending `queued_at`.
    pub queued_at: HlcTimestamp,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error_kind: Option<ErrorKind>,
    pub status: OperationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_version: Option<i64>,
}

impl QueuedOperation {
    /// Whether the next sync pass should pick this operation up.
    ///
    /// Auth and permission failures stay eligible (for a retry after
    /// re-authentication) until they run past the retry cap.
    pub fn is_eligible(&self, max_retries: u32) -> bool {
        match self.status {
            OperationStatus::Pending => true,
            OperationStatus::Failed => {
                self.last_error_kind.is_some_and(|k| k.needs_reauth())
                    && self.retry_count <= max_retries
            }
            OperationStatus::Syncing | OperationStatus::Conflict => false,
        }
    }
}

/// An operation as submitted by the domain layer.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOperation {
    /// Pre-assigned ID; a UUID is generated when absent.
    pub id: Option<OperationId>,
    pub kind: String,
    pub payload: Value,
    pub entity_id: Option<String>,
    pub entity_version: Option<i64>,
}

impl NewOperation {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            id: None,
            kind: kind.into(),
            payload,
            entity_id: None,
            entity_version: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<OperationId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Targets a specific entity, optionally at a known version for
    /// optimistic concurrency.
    pub fn with_entity(mut self, entity_id: impl Into<String>, version: Option<i64>) -> Self {
        self.entity_id = Some(entity_id.into());
        self.entity_version = version;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hlc::NodeId;

    fn operation(status: OperationStatus) -> QueuedOperation {
        QueuedOperation {
            id: "op-1".to_string(),
            kind: "task.create".to_string(),
            payload: serde_json::json!({"title": "Write tests"}),
            queued_at: HlcTimestamp::new(1000, 0, NodeId::new("abc12345").unwrap()),
            created_at: Utc::now(),
            retry_count: 0,
            last_error: None,
            last_error_kind: None,
            status,
            entity_id: None,
            entity_version: None,
        }
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(
            "pending".parse::<OperationStatus>().unwrap(),
            OperationStatus::Pending
        );
        assert_eq!(
            "CONFLICT".parse::<OperationStatus>().unwrap(),
            OperationStatus::Conflict
        );
        assert!("synced".parse::<OperationStatus>().is_err());
    }

    #[test]
    fn test_eligibility() {
        assert!(operation(OperationStatus::Pending).is_eligible(5));
        assert!(!operation(OperationStatus::Syncing).is_eligible(5));
        assert!(!operation(OperationStatus::Conflict).is_eligible(5));

        let mut failed = operation(OperationStatus::Failed);
        failed.last_error_kind = Some(ErrorKind::Validation);
        assert!(!failed.is_eligible(5));

        failed.last_error_kind = Some(ErrorKind::Auth);
        failed.retry_count = 5;
        assert!(failed.is_eligible(5));
        failed.retry_count = 6;
        assert!(!failed.is_eligible(5));
    }

    #[test]
    fn test_serialization_field_names() {
        let op = operation(OperationStatus::Pending);
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["type"], "task.create");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["queuedAt"], "1000:00000:abc12345");
        assert_eq!(json["retryCount"], 0);
        assert!(json.get("lastError").is_none());
    }

    #[test]
    fn test_new_operation_builder() {
        let op = NewOperation::new("task.update", serde_json::json!({}))
            .with_id("fixed")
            .with_entity("task-9", Some(3));
        assert_eq!(op.id.as_deref(), Some("fixed"));
        assert_eq!(op.entity_id.as_deref(), Some("task-9"));
        assert_eq!(op.entity_version, Some(3));
    }
}
