//! Wiring of the sync engine from configuration.

use std::sync::Arc;

use async_trait::async_trait;
use driftsync_core::conflict::ConflictHandler;
use driftsync_core::connectivity::{ConnectivityMonitor, HttpHealthProbe};
use driftsync_core::coordinator::SyncCoordinator;
use driftsync_core::executor::{HttpDispatcher, SyncExecutor};
use driftsync_core::hlc::{HybridLogicalClock, PhysicalClock, SystemClock};
use driftsync_core::queue::{OfflineQueue, QueuedOperation};

use crate::config::Config;
use crate::db::{init_db, SqliteQueueRepository};
use crate::identity::resolve_node_id;
use crate::operations::EntityResolver;

/// Local state every command works against: the node's clock and the
/// persistent queue.
pub struct SyncContext {
    pub clock: Arc<HybridLogicalClock>,
    pub queue: Arc<OfflineQueue>,
}

impl SyncContext {
    pub async fn open(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        Self::open_with_clock(config, Arc::new(SystemClock)).await
    }

    /// Opens the context on the given wall clock. The HLC resumes from the
    /// newest timestamp already in the queue.
    pub async fn open_with_clock(
        config: &Config,
        physical: Arc<dyn PhysicalClock>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let node_id = resolve_node_id(config)?;
        let clock = Arc::new(HybridLogicalClock::with_physical_clock(node_id, physical));

        let pool = init_db(&config.database_path.value).await?;
        let queue = Arc::new(OfflineQueue::new(
            Arc::new(SqliteQueueRepository::new(pool)),
            clock.clone(),
            config.sync.queue_config(),
        ));
        let restored = queue.restore_clock().await?;

        tracing::debug!(
            node_id = %clock.node_id(),
            database = %config.database_path.value.display(),
            restored = ?restored.map(|t| t.to_string()),
            "Opened sync context"
        );
        Ok(Self { clock, queue })
    }

    /// Connectivity monitor probing the configured server's health endpoint.
    /// Returns `None` when no server is configured.
    pub fn monitor(config: &Config) -> Option<ConnectivityMonitor> {
        let health_url = config.sync.health_url()?;
        let monitor_config = config.connectivity.monitor_config();
        let probe = HttpHealthProbe::new(health_url).with_timeout(monitor_config.probe_timeout);
        Some(ConnectivityMonitor::new(Arc::new(probe), monitor_config))
    }

    /// Full coordinator against the configured server. Returns `None` when
    /// no server is configured.
    pub fn coordinator(&self, config: &Config) -> Option<SyncCoordinator> {
        let server_url = config.sync.server_url.clone()?;
        let monitor = Self::monitor(config)?;

        let dispatcher = HttpDispatcher::new(server_url, config.sync.api_key.clone());
        let executor = SyncExecutor::new(
            Arc::new(EntityResolver),
            Arc::new(dispatcher),
            self.clock.clone(),
            config.sync.executor_config(),
        );

        Some(
            SyncCoordinator::new(self.queue.clone(), monitor, executor, self.clock.clone())
                .with_conflict_handler(Arc::new(ReportConflict)),
        )
    }
}

/// Surfaces rejected writes to the operator; the entry stays in the queue
/// under `conflict` until retried or removed.
struct ReportConflict;

#[async_trait]
impl ConflictHandler for ReportConflict {
    async fn handle_conflict(&self, operation: &QueuedOperation, message: &str) {
        eprintln!(
            "Conflict: {} {} was rejected by the server: {}",
            operation.kind,
            operation.entity_id.as_deref().unwrap_or(&operation.id),
            message
        );
        eprintln!(
            "  Resolve and run `driftsync queue retry {}` or `driftsync queue remove {}`",
            operation.id, operation.id
        );
    }
}
