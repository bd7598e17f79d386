//! driftsync core library
//!
//! Offline-first synchronization engine: hybrid logical clock, conflict
//! resolution, the offline operation queue, connectivity monitoring, the
//! sync executor and the coordinator that ties them together.

pub mod conflict;
pub mod connectivity;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod hlc;
pub mod queue;

pub use conflict::{
    ConflictHandler, ConflictResolver, ConflictWinner, FieldClocks, MergedRecord, Resolved,
};
pub use connectivity::{
    BackoffPolicy, ConnectionQuality, ConnectivityEvent, ConnectivityMonitor, ConnectivityState,
    HealthProbe, HttpHealthProbe, MonitorConfig, NetworkSignal, ProbeError,
};
pub use coordinator::{SyncCoordinator, SyncEvent, SyncOutcome, SyncStatus};
pub use error::ErrorKind;
pub use executor::{
    DispatchError, DispatchResponse, ExecutorConfig, ExecutorMessage, FailedOperation,
    HttpDispatcher, RequestDispatcher, RequestResolver, ResolveError, SyncExecutor, SyncProgress,
    SyncRequest, SyncResult,
};
pub use hlc::{HlcParseError, HlcTimestamp, HybridLogicalClock, NodeId};
pub use queue::{
    MemoryQueueRepository, NewOperation, OfflineQueue, OperationId, OperationStatus, QueueConfig,
    QueueError, QueueRepository, QueueStats, QueuedOperation,
};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
