//! Storage seam for the offline queue.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use super::operation::{OperationId, QueuedOperation};

/// Errors that can occur while reading or writing the queue.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue storage error: {0}")]
    Storage(String),

    #[error("Queued operation not found: {0}")]
    NotFound(OperationId),
}

/// Durable store backing the offline queue.
///
/// Implementations only persist; ordering, eviction and status transitions
/// are the queue's job.
#[async_trait]
pub trait QueueRepository: Send + Sync {
    async fn append(&self, operation: &QueuedOperation) -> Result<(), QueueError>;

    /// All stored operations, in no particular order.
    async fn list(&self) -> Result<Vec<QueuedOperation>, QueueError>;

    async fn get(&self, id: &str) -> Result<Option<QueuedOperation>, QueueError>;

    /// Replaces the stored operation with the same ID.
    async fn update(&self, operation: &QueuedOperation) -> Result<(), QueueError>;

    /// Returns whether an operation was removed.
    async fn delete(&self, id: &str) -> Result<bool, QueueError>;

    /// Returns how many operations were removed.
    async fn clear(&self) -> Result<usize, QueueError>;
}

/// Non-durable repository, for tests and for hosts without storage.
#[derive(Debug, Default)]
pub struct MemoryQueueRepository {
    operations: RwLock<Vec<QueuedOperation>>,
}

impl MemoryQueueRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueRepository for MemoryQueueRepository {
    async fn append(&self, operation: &QueuedOperation) -> Result<(), QueueError> {
        self.operations.write().await.push(operation.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<QueuedOperation>, QueueError> {
        Ok(self.operations.read().await.clone())
    }

    async fn get(&self, id: &str) -> Result<Option<QueuedOperation>, QueueError> {
        Ok(self
            .operations
            .read()
            .await
            .iter()
            .find(|op| op.id == id)
            .cloned())
    }

    async fn update(&self, operation: &QueuedOperation) -> Result<(), QueueError> {
        let mut operations = self.operations.write().await;
        let slot = operations
            .iter_mut()
            .find(|op| op.id == operation.id)
            .ok_or_else(|| QueueError::NotFound(operation.id.clone()))?;
        *slot = operation.clone();
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, QueueError> {
        let mut operations = self.operations.write().await;
        let before = operations.len();
        operations.retain(|op| op.id != id);
        Ok(operations.len() != before)
    }

    async fn clear(&self) -> Result<usize, QueueError> {
        let mut operations = self.operations.write().await;
        let removed = operations.len();
        operations.clear();
        Ok(removed)
    }
}
