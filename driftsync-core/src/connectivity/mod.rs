//! Server reachability: health probes, quality metrics and reconnection
//! backoff.

mod backoff;
mod monitor;
mod probe;
mod state;

pub use backoff::{
    BackoffPolicy, DEFAULT_BACKOFF_CAP, DEFAULT_INITIAL_RETRY_DELAY, DEFAULT_MAX_RETRY_DELAY,
};
pub use monitor::{
    ConnectivityEvent, ConnectivityMonitor, MonitorConfig, NetworkSignal, DEFAULT_CHECK_INTERVAL,
    DEFAULT_OFFLINE_CHECK_INTERVAL,
};
pub use probe::{HealthProbe, HttpHealthProbe, ProbeError, DEFAULT_PROBE_TIMEOUT};
pub use state::{ConnectionQuality, ConnectivityState, DEFAULT_LATENCY_WINDOW};
