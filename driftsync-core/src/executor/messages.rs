//! Messages a sync pass reports back to its owner.

use serde::Serialize;

use crate::error::ErrorKind;
use crate::hlc::HlcTimestamp;
use crate::queue::OperationId;

/// One operation that did not sync.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedOperation {
    pub id: OperationId,
    pub kind: ErrorKind,
    pub message: String,
}

/// Outcome of one pass: every operation lands in exactly one list.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncResult {
    pub success: Vec<OperationId>,
    pub failed: Vec<FailedOperation>,
}

impl SyncResult {
    pub fn total(&self) -> usize {
        self.success.len() + self.failed.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncProgress {
    pub completed: usize,
    pub total: usize,
    /// Requests of the current batch still awaiting a response.
    pub in_flight: usize,
}

/// Tagged messages from a running pass, in the order they happen.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorMessage {
    Started { total: usize },
    ItemSucceeded {
        id: OperationId,
        server_hlc: Option<HlcTimestamp>,
    },
    ItemFailed(FailedOperation),
    /// Sent after every settled operation.
    Progress(SyncProgress),
    Completed(SyncResult),
}
