//! Sync coordination: when to run a pass, and what to do with its results.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::conflict::ConflictHandler;
use crate::connectivity::{ConnectivityEvent, ConnectivityMonitor};
use crate::error::ErrorKind;
use crate::executor::{ExecutorMessage, FailedOperation, SyncExecutor, SyncProgress, SyncResult};
use crate::hlc::{HlcTimestamp, HybridLogicalClock};
use crate::queue::{OfflineQueue, QueueError};

const EVENT_CAPACITY: usize = 256;

/// Lifecycle events of sync passes.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Started { total: usize },
    Progress(SyncProgress),
    ItemFailed(FailedOperation),
    Completed(SyncResult),
}

/// What a sync trigger did.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Completed(SyncResult),
    /// Another pass was running; this trigger was dropped.
    AlreadyRunning,
    Offline,
    NothingToSync,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Operations the next pass would pick up.
    pub pending: usize,
    pub failed: usize,
    pub conflict: usize,
    pub in_progress: bool,
    pub is_connected: bool,
}

struct Inner {
    queue: Arc<OfflineQueue>,
    monitor: ConnectivityMonitor,
    executor: SyncExecutor,
    clock: Arc<HybridLogicalClock>,
    conflict_handler: Option<Arc<dyn ConflictHandler>>,
    in_progress: AtomicBool,
    last_sync_time: Mutex<Option<DateTime<Utc>>>,
    events: broadcast::Sender<SyncEvent>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

/// Ties the queue, monitor and executor together.
///
/// At most one pass runs at a time. Cloning is cheap and clones share the
/// same state.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<Inner>,
}

struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl SyncCoordinator {
    pub fn new(
        queue: Arc<OfflineQueue>,
        monitor: ConnectivityMonitor,
        executor: SyncExecutor,
        clock: Arc<HybridLogicalClock>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                queue,
                monitor,
                executor,
                clock,
                conflict_handler: None,
                in_progress: AtomicBool::new(false),
                last_sync_time: Mutex::new(None),
                events,
                listener: Mutex::new(None),
            }),
        }
    }

    /// Installs the hook for operations that end in `conflict`. Must be
    /// called before the coordinator is cloned or started.
    pub fn with_conflict_handler(mut self, handler: Arc<dyn ConflictHandler>) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.conflict_handler = Some(handler),
            None => tracing::warn!("Coordinator already shared, conflict handler not installed"),
        }
        self
    }

    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.inner.queue
    }

    pub fn monitor(&self) -> &ConnectivityMonitor {
        &self.inner.monitor
    }

    pub fn clock(&self) -> &Arc<HybridLogicalClock> {
        &self.inner.clock
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.in_progress.load(Ordering::Acquire)
    }

    /// Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    pub async fn status(&self) -> Result<SyncStatus, QueueError> {
        let stats = self.inner.queue.stats().await?;
        let pending = self.inner.queue.pending_count().await?;

        Ok(SyncStatus {
            last_sync_time: *lock(&self.inner.last_sync_time),
            pending,
            failed: stats.failed,
            conflict: stats.conflict,
            in_progress: self.is_syncing(),
            is_connected: self.inner.monitor.is_connected(),
        })
    }

    /// Manual trigger: verifies connectivity, then runs a pass.
    pub async fn sync_now(&self) -> Result<SyncOutcome, QueueError> {
        if self.is_syncing() {
            return Ok(SyncOutcome::AlreadyRunning);
        }

        let state = self.inner.monitor.check_connectivity().await;
        if !state.is_connected {
            tracing::info!("Server unreachable, skipping sync");
            return Ok(SyncOutcome::Offline);
        }

        self.run_pass().await
    }

    /// Resets operations stranded by an interrupted pass, runs an initial
    /// pass, then syncs again whenever connectivity comes back.
    ///
    /// Starts the connectivity monitor. Calling it twice does nothing.
    pub async fn start(&self) -> Result<(), QueueError> {
        self.inner.queue.reset_stale_syncing().await?;

        let mut listener = lock(&self.inner.listener);
        if listener.is_some() {
            return Ok(());
        }

        let mut events = self.inner.monitor.subscribe();
        let coordinator = self.clone();
        *listener = Some(tokio::spawn(async move {
            match coordinator.sync_now().await {
                Ok(outcome) => tracing::debug!(?outcome, "Initial sync finished"),
                Err(e) => tracing::error!("Initial sync failed: {}", e),
            }
            coordinator.inner.monitor.start();

            loop {
                match events.recv().await {
                    Ok(ConnectivityEvent::Connected { .. }) => coordinator.sync_on_reconnect().await,
                    Ok(ConnectivityEvent::Disconnected { .. }) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Missed connectivity events");
                        if coordinator.inner.monitor.is_connected() {
                            coordinator.sync_on_reconnect().await;
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));

        tracing::info!("Sync coordinator started");
        Ok(())
    }

    /// Stops the monitor and the reconnect listener. A pass already running
    /// finishes on its own.
    pub fn stop(&self) {
        self.inner.monitor.stop();
        if let Some(listener) = lock(&self.inner.listener).take() {
            listener.abort();
            tracing::info!("Sync coordinator stopped");
        }
    }

    async fn sync_on_reconnect(&self) {
        match self.inner.queue.pending_count().await {
            Ok(0) => tracing::debug!("Reconnected with an empty queue"),
            Ok(pending) => {
                tracing::info!(pending, "Reconnected, syncing queued operations");
                match self.run_pass().await {
                    Ok(outcome) => tracing::debug!(?outcome, "Reconnect sync finished"),
                    Err(e) => tracing::error!("Reconnect sync failed: {}", e),
                }
            }
            Err(e) => tracing::error!("Failed to read offline queue: {}", e),
        }
    }

    async fn run_pass(&self) -> Result<SyncOutcome, QueueError> {
        if self.inner.in_progress.swap(true, Ordering::AcqRel) {
            return Ok(SyncOutcome::AlreadyRunning);
        }
        let _guard = PassGuard(&self.inner.in_progress);

        let pending = self.inner.queue.list_pending().await?;
        if pending.is_empty() {
            return Ok(SyncOutcome::NothingToSync);
        }

        let mut claimed = Vec::with_capacity(pending.len());
        for operation in &pending {
            if let Err(e) = self.inner.queue.mark_syncing(&operation.id).await {
                self.release(&claimed).await;
                return Err(e);
            }
            claimed.push(operation.id.as_str());
        }

        let total = pending.len();
        let mut messages = self.inner.executor.spawn(pending);
        let mut result = None;

        while let Some(message) = messages.recv().await {
            match message {
                ExecutorMessage::Started { total } => self.emit(SyncEvent::Started { total }),
                ExecutorMessage::ItemSucceeded { id, server_hlc } => {
                    self.apply_success(&id, server_hlc.as_ref()).await
                }
                ExecutorMessage::ItemFailed(failure) => {
                    self.apply_failure(&failure).await;
                    self.emit(SyncEvent::ItemFailed(failure));
                }
                ExecutorMessage::Progress(progress) => self.emit(SyncEvent::Progress(progress)),
                ExecutorMessage::Completed(pass) => {
                    *lock(&self.inner.last_sync_time) = Some(Utc::now());
                    self.emit(SyncEvent::Completed(pass.clone()));
                    result = Some(pass);
                }
            }
        }

        match result {
            Some(result) => Ok(SyncOutcome::Completed(result)),
            None => {
                // The pass task died; anything still syncing is reset on the
                // next start.
                tracing::error!(total, "Sync pass ended without a result");
                Ok(SyncOutcome::Completed(SyncResult::default()))
            }
        }
    }

    /// Puts operations claimed by an aborted pass back in line.
    async fn release(&self, ids: &[&str]) {
        for id in ids {
            if let Err(e) = self.inner.queue.mark_pending(id).await {
                tracing::error!(id, "Failed to release operation from syncing: {}", e);
            }
        }
    }

    async fn apply_success(&self, id: &str, server_hlc: Option<&HlcTimestamp>) {
        if let Err(e) = self.inner.queue.mark_synced(id).await {
            tracing::error!(id, "Failed to remove synced operation: {}", e);
        }
        if let Some(server_hlc) = server_hlc {
            self.inner.clock.receive(server_hlc);
        }
    }

    async fn apply_failure(&self, failure: &FailedOperation) {
        let status = match self
            .inner
            .queue
            .mark_failed(&failure.id, failure.kind, &failure.message)
            .await
        {
            Ok(status) => status,
            Err(e) => {
                tracing::error!(id = %failure.id, "Failed to record sync failure: {}", e);
                return;
            }
        };
        tracing::debug!(id = %failure.id, %status, "Recorded sync failure");

        if failure.kind != ErrorKind::Conflict {
            return;
        }
        let Some(handler) = &self.inner.conflict_handler else {
            return;
        };
        match self.inner.queue.get(&failure.id).await {
            Ok(Some(operation)) => handler.handle_conflict(&operation, &failure.message).await,
            Ok(None) => {}
            Err(e) => tracing::error!(id = %failure.id, "Failed to load conflicted operation: {}", e),
        }
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("in_progress", &self.is_syncing())
            .field("monitor", &self.inner.monitor)
            .finish()
    }
}
