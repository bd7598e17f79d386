//! Sync executor: turns pending operations into requests and reports
//! per-operation outcomes.

mod dispatcher;
mod messages;
mod request;
mod sync_executor;

pub use dispatcher::{
    extract_message, DispatchError, DispatchResponse, HttpDispatcher, RequestDispatcher,
    HLC_HEADER, IDEMPOTENCY_KEY_HEADER,
};
pub use messages::{ExecutorMessage, FailedOperation, SyncProgress, SyncResult};
pub use request::{RequestResolver, ResolveError, SyncRequest};
pub use sync_executor::{
    ExecutorConfig, SyncExecutor, DEFAULT_BATCH_DELAY, DEFAULT_CONCURRENCY,
    DEFAULT_REQUEST_TIMEOUT,
};
