//! Connectivity state and quality metrics.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Default number of latency samples kept for jitter.
pub const DEFAULT_LATENCY_WINDOW: usize = 10;

/// Link quality bucketed from the latest probe latency.
///
/// Ordered from worst to best so callers can write `quality >= Fair`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    Unknown,
    Poor,
    Fair,
    Good,
    Excellent,
}

impl ConnectionQuality {
    pub fn from_latency(latency: Duration) -> Self {
        match latency.as_millis() {
            0..=99 => ConnectionQuality::Excellent,
            100..=299 => ConnectionQuality::Good,
            300..=599 => ConnectionQuality::Fair,
            _ => ConnectionQuality::Poor,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionQuality::Unknown => "unknown",
            ConnectionQuality::Poor => "poor",
            ConnectionQuality::Fair => "fair",
            ConnectionQuality::Good => "good",
            ConnectionQuality::Excellent => "excellent",
        }
    }
}

impl fmt::Display for ConnectionQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of reachability as last observed by the monitor.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectivityState {
    pub is_connected: bool,
    #[serde(skip)]
    samples: VecDeque<Duration>,
    #[serde(skip)]
    window: usize,
    /// Latest probe latency.
    pub latency: Option<Duration>,
    /// Sample standard deviation of the latency window.
    pub jitter: Option<Duration>,
    pub quality: ConnectionQuality,
    pub consecutive_failures: u32,
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl ConnectivityState {
    /// Initial state: optimistically connected, nothing measured yet.
    pub fn new(window: usize) -> Self {
        Self {
            is_connected: true,
            samples: VecDeque::with_capacity(window.max(1)),
            window: window.max(1),
            latency: None,
            jitter: None,
            quality: ConnectionQuality::Unknown,
            consecutive_failures: 0,
            last_checked_at: None,
        }
    }

    pub fn samples(&self) -> impl Iterator<Item = &Duration> {
        self.samples.iter()
    }

    pub(crate) fn record_success(&mut self, latency: Duration) {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(latency);

        self.is_connected = true;
        self.latency = Some(latency);
        self.jitter = Some(sample_std_dev(&self.samples));
        self.quality = ConnectionQuality::from_latency(latency);
        self.consecutive_failures = 0;
        self.last_checked_at = Some(Utc::now());
    }

    pub(crate) fn record_failure(&mut self) {
        self.is_connected = false;
        self.latency = None;
        self.jitter = None;
        self.quality = ConnectionQuality::Unknown;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_checked_at = Some(Utc::now());
    }

    /// The platform reported the network gone; no probe was made.
    pub(crate) fn record_offline_signal(&mut self) {
        self.is_connected = false;
        self.latency = None;
        self.jitter = None;
        self.quality = ConnectionQuality::Unknown;
    }
}

impl Default for ConnectivityState {
    fn default() -> Self {
        Self::new(DEFAULT_LATENCY_WINDOW)
    }
}

fn sample_std_dev(samples: &VecDeque<Duration>) -> Duration {
    let n = samples.len();
    if n < 2 {
        return Duration::ZERO;
    }

    let values: Vec<f64> = samples.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
    let mean = values.iter().sum::<f64>() / n as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;

    Duration::from_secs_f64(variance.sqrt() / 1000.0)
}
