//! Draining the pending list against the server.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;

use super::dispatcher::{extract_message, DispatchError, RequestDispatcher};
use super::messages::{ExecutorMessage, FailedOperation, SyncProgress, SyncResult};
use super::request::RequestResolver;
use crate::error::ErrorKind;
use crate::hlc::{HlcTimestamp, HybridLogicalClock};
use crate::queue::{OperationId, QueuedOperation};

pub const DEFAULT_CONCURRENCY: usize = 3;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(100);

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Requests in flight per batch.
    pub concurrency: usize,
    pub request_timeout: Duration,
    /// Pause between batches.
    pub batch_delay: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            batch_delay: DEFAULT_BATCH_DELAY,
        }
    }
}

enum Outcome {
    Succeeded {
        id: OperationId,
        server_hlc: Option<HlcTimestamp>,
    },
    Failed(FailedOperation),
}

/// Runs sync passes over a list of operations.
///
/// Operations go out in batches of at most `concurrency`. A batch settles
/// completely before the next one starts, so batch-to-batch order follows
/// the input order; within a batch there is no ordering. Per-operation
/// failures are recorded in the result and never abort the pass.
#[derive(Clone)]
pub struct SyncExecutor {
    resolver: Arc<dyn RequestResolver>,
    dispatcher: Arc<dyn RequestDispatcher>,
    clock: Arc<HybridLogicalClock>,
    config: ExecutorConfig,
}

impl SyncExecutor {
    pub fn new(
        resolver: Arc<dyn RequestResolver>,
        dispatcher: Arc<dyn RequestDispatcher>,
        clock: Arc<HybridLogicalClock>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            resolver,
            dispatcher,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Runs a pass on its own task, streaming messages to the receiver.
    /// The last message is always `Completed`.
    pub fn spawn(&self, operations: Vec<QueuedOperation>) -> mpsc::Receiver<ExecutorMessage> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let executor = self.clone();
        tokio::spawn(async move {
            executor.run(operations, Some(tx)).await;
        });
        rx
    }

    /// Runs a pass inline.
    pub async fn execute(&self, operations: Vec<QueuedOperation>) -> SyncResult {
        self.run(operations, None).await
    }

    async fn run(
        &self,
        operations: Vec<QueuedOperation>,
        tx: Option<mpsc::Sender<ExecutorMessage>>,
    ) -> SyncResult {
        let emit = |message: ExecutorMessage| {
            let tx = tx.clone();
            async move {
                if let Some(tx) = tx {
                    // The receiver may be gone; the pass still finishes.
                    let _ = tx.send(message).await;
                }
            }
        };

        let total = operations.len();
        tracing::info!(total, "Starting sync pass");
        emit(ExecutorMessage::Started { total }).await;

        let concurrency = self.config.concurrency.max(1);
        let mut succeeded: Vec<(usize, OperationId)> = Vec::new();
        let mut failed: Vec<(usize, FailedOperation)> = Vec::new();
        let mut completed = 0;

        let mut batches = operations.chunks(concurrency).enumerate().peekable();
        while let Some((batch_index, batch)) = batches.next() {
            let offset = batch_index * concurrency;
            let mut in_flight: FuturesUnordered<_> = batch
                .iter()
                .enumerate()
                .map(|(i, op)| async move { (offset + i, self.sync_one(op).await) })
                .collect();

            while let Some((index, outcome)) = in_flight.next().await {
                completed += 1;
                match outcome {
                    Outcome::Succeeded { id, server_hlc } => {
                        succeeded.push((index, id.clone()));
                        emit(ExecutorMessage::ItemSucceeded { id, server_hlc }).await;
                    }
                    Outcome::Failed(failure) => {
                        failed.push((index, failure.clone()));
                        emit(ExecutorMessage::ItemFailed(failure)).await;
                    }
                }
                emit(ExecutorMessage::Progress(SyncProgress {
                    completed,
                    total,
                    in_flight: in_flight.len(),
                }))
                .await;
            }

            if batches.peek().is_some() && !self.config.batch_delay.is_zero() {
                tokio::time::sleep(self.config.batch_delay).await;
            }
        }

        succeeded.sort_by_key(|(index, _)| *index);
        failed.sort_by_key(|(index, _)| *index);
        let result = SyncResult {
            success: succeeded.into_iter().map(|(_, id)| id).collect(),
            failed: failed.into_iter().map(|(_, f)| f).collect(),
        };

        tracing::info!(
            succeeded = result.success.len(),
            failed = result.failed.len(),
            "Sync pass complete"
        );
        emit(ExecutorMessage::Completed(result.clone())).await;

        result
    }

    async fn sync_one(&self, operation: &QueuedOperation) -> Outcome {
        let failed = |kind: ErrorKind, message: String| {
            tracing::debug!(id = %operation.id, error_kind = %kind, "Operation failed: {}", message);
            Outcome::Failed(FailedOperation {
                id: operation.id.clone(),
                kind,
                message,
            })
        };

        let request = match self.resolver.resolve(operation) {
            Ok(request) => request,
            Err(e) => return failed(ErrorKind::Validation, e.to_string()),
        };

        let hlc = self.clock.now();
        let sent = tokio::time::timeout(
            self.config.request_timeout,
            self.dispatcher.dispatch(operation, &request, &hlc),
        )
        .await;

        let response = match sent {
            Ok(Ok(response)) => response,
            Ok(Err(DispatchError::Network(message))) => {
                return failed(ErrorKind::Network, message)
            }
            Ok(Err(DispatchError::Timeout)) | Err(_) => {
                return failed(
                    ErrorKind::Timeout,
                    format!(
                        "Request timed out after {}ms",
                        self.config.request_timeout.as_millis()
                    ),
                )
            }
        };

        match ErrorKind::from_status(response.status) {
            None => {
                tracing::debug!(id = %operation.id, status = response.status, "Operation synced");
                Outcome::Succeeded {
                    id: operation.id.clone(),
                    server_hlc: response.server_hlc,
                }
            }
            Some(kind) => failed(kind, extract_message(&response.body, response.status)),
        }
    }
}
