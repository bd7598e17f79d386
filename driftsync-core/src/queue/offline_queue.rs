//! The offline operation queue.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use super::operation::{NewOperation, OperationId, OperationStatus, QueuedOperation};
use super::repository::{QueueError, QueueRepository};
use crate::error::ErrorKind;
use crate::hlc::{HlcTimestamp, HybridLogicalClock};

/// Default retry cap for transient failures.
pub const DEFAULT_MAX_RETRIES: u32 = 5;
/// Default capacity before the oldest entries are evicted.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// An operation whose retry count exceeds this becomes terminally failed.
    pub max_retries: u32,
    /// Enqueuing past this size evicts the oldest entries first.
    pub max_queue_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
        }
    }
}

/// Result of an enqueue.
#[derive(Debug, Clone)]
pub struct EnqueueReceipt {
    pub operation: QueuedOperation,
    /// Operations dropped to keep the queue within capacity.
    pub evicted: Vec<OperationId>,
}

/// Per-status counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub syncing: usize,
    pub failed: usize,
    pub conflict: usize,
}

impl QueueStats {
    pub fn total(&self) -> usize {
        self.pending + self.syncing + self.failed + self.conflict
    }
}

/// Durable, ordered store of operations awaiting sync.
///
/// Entries are stamped with the shared HLC on arrival and synced in
/// ascending `queued_at` order, so a retried entry keeps its original place
/// relative to newer work.
pub struct OfflineQueue {
    repository: Arc<dyn QueueRepository>,
    clock: Arc<HybridLogicalClock>,
    config: QueueConfig,
}

impl OfflineQueue {
    pub fn new(
        repository: Arc<dyn QueueRepository>,
        clock: Arc<HybridLogicalClock>,
        config: QueueConfig,
    ) -> Self {
        Self {
            repository,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Appends an operation and enforces the capacity bound.
    ///
    /// Overflow is not an error: the oldest non-syncing entries are evicted,
    /// logged, and reported in the receipt.
    pub async fn enqueue(&self, new: NewOperation) -> Result<EnqueueReceipt, QueueError> {
        let operation = QueuedOperation {
            id: new.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            kind: new.kind,
            payload: new.payload,
            queued_at: self.clock.now(),
            created_at: Utc::now(),
            retry_count: 0,
            last_error: None,
            last_error_kind: None,
            status: OperationStatus::Pending,
            entity_id: new.entity_id,
            entity_version: new.entity_version,
        };

        self.repository.append(&operation).await?;
        tracing::debug!(id = %operation.id, kind = %operation.kind, "Queued operation");

        let evicted = self.evict_overflow(&operation.id).await?;

        Ok(EnqueueReceipt { operation, evicted })
    }

    /// Evicts the oldest entries past capacity. Entries in flight and the
    /// operation just enqueued are never candidates, so the queue may stay
    /// over capacity until a later enqueue.
    async fn evict_overflow(&self, newest: &str) -> Result<Vec<OperationId>, QueueError> {
        let all = self.repository.list().await?;
        if all.len() <= self.config.max_queue_size {
            return Ok(Vec::new());
        }

        let overflow = all.len() - self.config.max_queue_size;
        let mut candidates: Vec<QueuedOperation> = all
            .into_iter()
            .filter(|op| op.status != OperationStatus::Syncing && op.id != newest)
            .collect();
        candidates.sort_by(|a, b| a.queued_at.cmp(&b.queued_at));

        if candidates.len() < overflow {
            tracing::warn!(
                overflow,
                evictable = candidates.len(),
                max_queue_size = self.config.max_queue_size,
                "Offline queue over capacity while operations are syncing"
            );
        }

        let mut evicted = Vec::with_capacity(overflow);
        for op in candidates.into_iter().take(overflow) {
            if self.repository.delete(&op.id).await? {
                tracing::warn!(
                    id = %op.id,
                    kind = %op.kind,
                    status = %op.status,
                    max_queue_size = self.config.max_queue_size,
                    "Offline queue full, evicted oldest operation"
                );
                evicted.push(op.id);
            }
        }

        Ok(evicted)
    }

    /// Advances the clock to the newest stored `queued_at`, so entries
    /// queued by this process sort after those from earlier runs even if
    /// the wall clock has since stepped back. Call once after opening.
    pub async fn restore_clock(&self) -> Result<Option<HlcTimestamp>, QueueError> {
        let newest = self
            .repository
            .list()
            .await?
            .into_iter()
            .map(|op| op.queued_at)
            .max();
        if let Some(newest) = &newest {
            self.clock.merge(newest);
        }
        Ok(newest)
    }

    /// Operations the next pass should sync, oldest `queued_at` first.
    pub async fn list_pending(&self) -> Result<Vec<QueuedOperation>, QueueError> {
        let mut pending: Vec<QueuedOperation> = self
            .repository
            .list()
            .await?
            .into_iter()
            .filter(|op| op.is_eligible(self.config.max_retries))
            .collect();
        pending.sort_by(|a, b| a.queued_at.cmp(&b.queued_at));
        Ok(pending)
    }

    /// Every stored operation, oldest first.
    pub async fn list_all(&self) -> Result<Vec<QueuedOperation>, QueueError> {
        let mut all = self.repository.list().await?;
        all.sort_by(|a, b| a.queued_at.cmp(&b.queued_at));
        Ok(all)
    }

    pub async fn get(&self, id: &str) -> Result<Option<QueuedOperation>, QueueError> {
        self.repository.get(id).await
    }

    pub async fn pending_count(&self) -> Result<usize, QueueError> {
        Ok(self.list_pending().await?.len())
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let mut stats = QueueStats::default();
        for op in self.repository.list().await? {
            match op.status {
                OperationStatus::Pending => stats.pending += 1,
                OperationStatus::Syncing => stats.syncing += 1,
                OperationStatus::Failed => stats.failed += 1,
                OperationStatus::Conflict => stats.conflict += 1,
            }
        }
        Ok(stats)
    }

    pub async fn mark_syncing(&self, id: &str) -> Result<(), QueueError> {
        self.set_status(id, OperationStatus::Syncing).await
    }

    /// Releases an operation claimed by `mark_syncing` without recording an
    /// attempt.
    pub async fn mark_pending(&self, id: &str) -> Result<(), QueueError> {
        self.set_status(id, OperationStatus::Pending).await
    }

    async fn set_status(&self, id: &str, status: OperationStatus) -> Result<(), QueueError> {
        let mut op = self.require(id).await?;
        op.status = status;
        self.repository.update(&op).await
    }

    /// Removes a successfully synced operation. Missing IDs are ignored, so
    /// a duplicate acknowledgement is harmless.
    pub async fn mark_synced(&self, id: &str) -> Result<(), QueueError> {
        if !self.repository.delete(id).await? {
            tracing::debug!(id, "Synced operation was already gone from the queue");
        }
        Ok(())
    }

    /// Records a failed attempt and returns the resulting status.
    pub async fn mark_failed(
        &self,
        id: &str,
        kind: ErrorKind,
        message: &str,
    ) -> Result<OperationStatus, QueueError> {
        let mut op = self.require(id).await?;

        op.status = match kind {
            ErrorKind::Conflict => OperationStatus::Conflict,
            ErrorKind::Validation => OperationStatus::Failed,
            ErrorKind::Auth | ErrorKind::Permission => {
                op.retry_count += 1;
                OperationStatus::Failed
            }
            ErrorKind::Server | ErrorKind::Network | ErrorKind::Timeout | ErrorKind::Unknown => {
                op.retry_count += 1;
                if op.retry_count > self.config.max_retries {
                    OperationStatus::Failed
                } else {
                    OperationStatus::Pending
                }
            }
        };
        op.last_error = Some(message.to_string());
        op.last_error_kind = Some(kind);

        if !op.is_eligible(self.config.max_retries) {
            tracing::warn!(
                id = %op.id,
                kind = %op.kind,
                error_kind = %kind,
                retry_count = op.retry_count,
                status = %op.status,
                "Operation needs operator attention: {}",
                message
            );
        }

        self.repository.update(&op).await?;
        Ok(op.status)
    }

    /// Operator action: puts a failed or conflicted operation back in line
    /// with a fresh retry budget. It keeps its original `queued_at`.
    pub async fn retry(&self, id: &str) -> Result<QueuedOperation, QueueError> {
        let mut op = self.require(id).await?;
        op.status = OperationStatus::Pending;
        op.retry_count = 0;
        op.last_error = None;
        op.last_error_kind = None;
        self.repository.update(&op).await?;
        Ok(op)
    }

    pub async fn remove(&self, id: &str) -> Result<bool, QueueError> {
        self.repository.delete(id).await
    }

    pub async fn clear(&self) -> Result<usize, QueueError> {
        self.repository.clear().await
    }

    /// Returns entries stranded in `syncing` by an interrupted pass to
    /// `pending`. Call once at startup, before the first pass.
    pub async fn reset_stale_syncing(&self) -> Result<usize, QueueError> {
        let mut reset = 0;
        for mut op in self.repository.list().await? {
            if op.status == OperationStatus::Syncing {
                op.status = OperationStatus::Pending;
                self.repository.update(&op).await?;
                reset += 1;
            }
        }
        if reset > 0 {
            tracing::info!(reset, "Reset operations left in syncing state");
        }
        Ok(reset)
    }

    async fn require(&self, id: &str) -> Result<QueuedOperation, QueueError> {
        self.repository
            .get(id)
            .await?
            .ok_or_else(|| QueueError::NotFound(id.to_string()))
    }
}
