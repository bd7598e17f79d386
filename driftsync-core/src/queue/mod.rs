//! Durable offline operation queue.
//!
//! Domain actions attempted while offline become [`QueuedOperation`]s. The
//! queue orders them by HLC enqueue time, tracks retries and terminal
//! states, and bounds its own size. Persistence is delegated to a
//! [`QueueRepository`].

mod offline_queue;
mod operation;
mod repository;

pub use offline_queue::{
    EnqueueReceipt, OfflineQueue, QueueConfig, QueueStats, DEFAULT_MAX_QUEUE_SIZE,
    DEFAULT_MAX_RETRIES,
};
pub use operation::{NewOperation, OperationId, OperationStatus, QueuedOperation};
pub use repository::{MemoryQueueRepository, QueueError, QueueRepository};
