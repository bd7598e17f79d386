//! Active connectivity monitoring.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use super::backoff::BackoffPolicy;
use super::probe::{HealthProbe, ProbeError, DEFAULT_PROBE_TIMEOUT};
use super::state::{ConnectionQuality, ConnectivityState, DEFAULT_LATENCY_WINDOW};

pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_OFFLINE_CHECK_INTERVAL: Duration = Duration::from_secs(5);

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Hard timeout around each probe.
    pub probe_timeout: Duration,
    /// Poll cadence while connected.
    pub check_interval: Duration,
    /// Poll cadence while disconnected and no reconnect delay is scheduled.
    pub offline_check_interval: Duration,
    pub backoff: BackoffPolicy,
    /// Latency samples kept for jitter.
    pub latency_window: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            check_interval: DEFAULT_CHECK_INTERVAL,
            offline_check_interval: DEFAULT_OFFLINE_CHECK_INTERVAL,
            backoff: BackoffPolicy::default(),
            latency_window: DEFAULT_LATENCY_WINDOW,
        }
    }
}

/// Reachability transitions. Sent only when `is_connected` changes.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectivityEvent {
    Connected {
        latency: Duration,
        quality: ConnectionQuality,
    },
    Disconnected {
        consecutive_failures: u32,
        reason: String,
    },
}

/// Passive hints from the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkSignal {
    /// The network interface came back; verify with a probe right away.
    Online,
    /// The network interface went away; assume disconnected without probing.
    Offline,
}

struct Shared {
    state: ConnectivityState,
    /// Delay before the next reconnection attempt, while disconnected.
    retry_delay: Option<Duration>,
}

struct Control {
    task: JoinHandle<()>,
    signals: mpsc::UnboundedSender<NetworkSignal>,
}

struct Inner {
    probe: Arc<dyn HealthProbe>,
    config: MonitorConfig,
    shared: Mutex<Shared>,
    probing: AtomicBool,
    monitoring: AtomicBool,
    /// Bumped by `stop()`; probe results from an older epoch are dropped.
    epoch: AtomicU64,
    events: broadcast::Sender<ConnectivityEvent>,
    control: Mutex<Option<Control>>,
}

/// Tracks server reachability with periodic health probes.
///
/// Cloning is cheap; clones share state, subscribers and the polling task.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<Inner>,
}

/// Resets the in-flight flag even when the probing future is dropped.
struct ProbeGuard<'a>(&'a AtomicBool);

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl ConnectivityMonitor {
    pub fn new(probe: Arc<dyn HealthProbe>, config: MonitorConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let state = ConnectivityState::new(config.latency_window);

        Self {
            inner: Arc::new(Inner {
                probe,
                config,
                shared: Mutex::new(Shared {
                    state,
                    retry_delay: None,
                }),
                probing: AtomicBool::new(false),
                monitoring: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                events,
                control: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectivityState {
        lock(&self.inner.shared).state.clone()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.inner.shared).state.is_connected
    }

    pub fn is_monitoring(&self) -> bool {
        self.inner.monitoring.load(Ordering::Acquire)
    }

    /// Scheduled delay before the next reconnection attempt, if disconnected.
    pub fn retry_delay(&self) -> Option<Duration> {
        lock(&self.inner.shared).retry_delay
    }

    /// Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.inner.events.subscribe()
    }

    /// Runs one health probe and returns the resulting state.
    ///
    /// Only one probe is in flight at a time; an overlapping call returns
    /// the current state without probing.
    pub async fn check_connectivity(&self) -> ConnectivityState {
        if self.inner.probing.swap(true, Ordering::AcqRel) {
            tracing::trace!("Probe already in flight");
            return self.state();
        }
        let _guard = ProbeGuard(&self.inner.probing);
        let epoch = self.inner.epoch.load(Ordering::Acquire);

        let started = Instant::now();
        let outcome =
            match tokio::time::timeout(self.inner.config.probe_timeout, self.inner.probe.probe())
                .await
            {
                Ok(result) => result,
                Err(_) => Err(ProbeError::Timeout),
            };
        let latency = started.elapsed();

        if self.inner.epoch.load(Ordering::Acquire) != epoch {
            tracing::debug!("Monitor stopped during probe, ignoring result");
            return self.state();
        }

        self.apply(outcome, latency)
    }

    fn apply(&self, outcome: Result<(), ProbeError>, latency: Duration) -> ConnectivityState {
        let (snapshot, event) = {
            let mut shared = lock(&self.inner.shared);
            let was_connected = shared.state.is_connected;

            let event = match outcome {
                Ok(()) => {
                    shared.state.record_success(latency);
                    shared.retry_delay = None;
                    tracing::debug!(
                        latency_ms = latency.as_millis() as u64,
                        quality = %shared.state.quality,
                        "Health check succeeded"
                    );
                    (!was_connected).then(|| ConnectivityEvent::Connected {
                        latency,
                        quality: shared.state.quality,
                    })
                }
                Err(e) => {
                    shared.state.record_failure();
                    let failures = shared.state.consecutive_failures;
                    let delay = self.inner.config.backoff.next_delay(failures, shared.retry_delay);
                    shared.retry_delay = Some(delay);
                    tracing::debug!(
                        failures,
                        retry_in_ms = delay.as_millis() as u64,
                        "Health check failed: {}",
                        e
                    );
                    was_connected.then(|| ConnectivityEvent::Disconnected {
                        consecutive_failures: failures,
                        reason: e.to_string(),
                    })
                }
            };

            (shared.state.clone(), event)
        };

        if let Some(event) = event {
            match &event {
                ConnectivityEvent::Connected { .. } => tracing::info!("Connectivity restored"),
                ConnectivityEvent::Disconnected { reason, .. } => {
                    tracing::warn!("Connectivity lost: {}", reason)
                }
            }
            // No subscribers is fine
            let _ = self.inner.events.send(event);
        }

        snapshot
    }

    /// Feeds a platform network signal into the monitor.
    ///
    /// `Offline` flips the state to disconnected immediately. `Online`
    /// triggers a verification probe on the polling task; without a running
    /// task it is ignored.
    pub fn notify(&self, signal: NetworkSignal) {
        if signal == NetworkSignal::Offline {
            self.go_offline();
        }

        let control = lock(&self.inner.control);
        match control.as_ref() {
            Some(control) => {
                let _ = control.signals.send(signal);
            }
            None => tracing::debug!(?signal, "Network signal received while not monitoring"),
        }
    }

    fn go_offline(&self) {
        let event = {
            let mut shared = lock(&self.inner.shared);
            let was_connected = shared.state.is_connected;
            shared.state.record_offline_signal();
            if shared.retry_delay.is_none() {
                let failures = shared.state.consecutive_failures;
                shared.retry_delay = Some(self.inner.config.backoff.next_delay(failures, None));
            }
            was_connected.then(|| ConnectivityEvent::Disconnected {
                consecutive_failures: shared.state.consecutive_failures,
                reason: "network offline".to_string(),
            })
        };

        if let Some(event) = event {
            tracing::warn!("Connectivity lost: network offline");
            let _ = self.inner.events.send(event);
        }
    }

    /// Starts the polling task. The first probe runs immediately.
    ///
    /// Must be called from within a tokio runtime. Calling it while already
    /// monitoring does nothing.
    pub fn start(&self) {
        let mut control = lock(&self.inner.control);
        if control.is_some() {
            return;
        }

        self.inner.monitoring.store(true, Ordering::Release);
        let (signals, receiver) = mpsc::unbounded_channel();
        let monitor = self.clone();
        let task = tokio::spawn(async move { monitor.run(receiver).await });

        *control = Some(Control { task, signals });
        tracing::info!(
            check_interval_ms = self.inner.config.check_interval.as_millis() as u64,
            "Connectivity monitor started"
        );
    }

    /// Stops polling. Timers are cancelled at once and a probe already in
    /// flight is abandoned.
    pub fn stop(&self) {
        let control = lock(&self.inner.control).take();
        self.inner.monitoring.store(false, Ordering::Release);
        self.inner.epoch.fetch_add(1, Ordering::AcqRel);

        if let Some(control) = control {
            control.task.abort();
            tracing::info!("Connectivity monitor stopped");
        }
    }

    async fn run(self, mut signals: mpsc::UnboundedReceiver<NetworkSignal>) {
        let mut wait = Duration::ZERO;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    self.check_connectivity().await;
                }
                signal = signals.recv() => match signal {
                    Some(NetworkSignal::Online) => {
                        tracing::debug!("Network online signal, verifying");
                        self.check_connectivity().await;
                    }
                    // State already flipped by notify(); just reschedule.
                    Some(NetworkSignal::Offline) => {}
                    None => break,
                },
            }

            if !self.is_monitoring() {
                break;
            }
            wait = self.next_wait();
        }
    }

    /// One timer, two cadences: the steady interval while connected, the
    /// jittered backoff delay otherwise.
    fn next_wait(&self) -> Duration {
        let shared = lock(&self.inner.shared);
        let config = &self.inner.config;
        if shared.state.is_connected {
            config.check_interval
        } else {
            shared.retry_delay.unwrap_or(config.offline_check_interval)
        }
    }
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("state", &self.state())
            .field("monitoring", &self.is_monitoring())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    /// Replays scripted outcomes, then keeps returning the fallback.
    struct ScriptedProbe {
        script: Mutex<VecDeque<Result<(), ProbeError>>>,
        fallback: Result<(), ProbeError>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl ScriptedProbe {
        fn new(script: Vec<Result<(), ProbeError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback: Ok(()),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                fallback: Err(ProbeError::Request("connection refused".to_string())),
                ..Self::new(Vec::new())
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HealthProbe for ScriptedProbe {
        async fn probe(&self) -> Result<(), ProbeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let next = lock(&self.script).pop_front();
            next.unwrap_or_else(|| self.fallback.clone())
        }
    }

    fn monitor(probe: Arc<ScriptedProbe>) -> ConnectivityMonitor {
        ConnectivityMonitor::new(probe, MonitorConfig::default())
    }

    fn unhealthy() -> Result<(), ProbeError> {
        Err(ProbeError::Unhealthy("unhealthy".to_string()))
    }

    #[tokio::test]
    async fn test_initially_connected_without_event() {
        let probe = Arc::new(ScriptedProbe::new(vec![Ok(())]));
        let monitor = monitor(probe.clone());
        let mut events = monitor.subscribe();

        assert!(monitor.is_connected());
        let state = monitor.check_connectivity().await;

        assert!(state.is_connected);
        assert!(state.latency.is_some());
        assert_ne!(state.quality, ConnectionQuality::Unknown);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_events_only_on_transitions() {
        let probe = Arc::new(ScriptedProbe::new(vec![
            unhealthy(),
            unhealthy(),
            Ok(()),
            Ok(()),
        ]));
        let monitor = monitor(probe);
        let mut events = monitor.subscribe();

        for _ in 0..4 {
            monitor.check_connectivity().await;
        }

        match events.try_recv().unwrap() {
            ConnectivityEvent::Disconnected {
                consecutive_failures,
                ..
            } => assert_eq!(consecutive_failures, 1),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(
            events.try_recv().unwrap(),
            ConnectivityEvent::Connected { .. }
        ));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failures_schedule_growing_retry() {
        let probe = Arc::new(ScriptedProbe::failing());
        let monitor = monitor(probe);

        let mut previous = Duration::ZERO;
        for expected in 1..=4 {
            let state = monitor.check_connectivity().await;
            assert_eq!(state.consecutive_failures, expected);
            let delay = monitor.retry_delay().unwrap();
            assert!(delay >= previous);
            previous = delay;
        }
    }

    #[tokio::test]
    async fn test_success_clears_retry_delay() {
        let probe = Arc::new(ScriptedProbe::new(vec![unhealthy(), Ok(())]));
        let monitor = monitor(probe);

        monitor.check_connectivity().await;
        assert!(monitor.retry_delay().is_some());
        let state = monitor.check_connectivity().await;
        assert!(monitor.retry_delay().is_none());
        assert_eq!(state.consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_timeout_disconnects_once() {
        let probe = Arc::new(ScriptedProbe::new(vec![]).with_delay(Duration::from_secs(20)));
        let monitor = ConnectivityMonitor::new(
            probe,
            MonitorConfig {
                probe_timeout: Duration::from_millis(10_000),
                ..MonitorConfig::default()
            },
        );
        let mut events = monitor.subscribe();

        let state = monitor.check_connectivity().await;

        assert!(!state.is_connected);
        assert_eq!(state.quality, ConnectionQuality::Unknown);
        match events.try_recv().unwrap() {
            ConnectivityEvent::Disconnected { reason, .. } => {
                assert_eq!(reason, ProbeError::Timeout.to_string())
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_check_does_not_probe() {
        let probe = Arc::new(ScriptedProbe::new(vec![]).with_delay(Duration::from_millis(200)));
        let monitor = monitor(probe.clone());

        let (first, second) = tokio::join!(
            monitor.check_connectivity(),
            monitor.check_connectivity()
        );

        assert_eq!(probe.calls(), 1);
        // The overlapping call saw the state before the probe finished.
        assert!(first.latency.is_some() ^ second.latency.is_some());
    }

    #[tokio::test]
    async fn test_offline_signal_flips_immediately() {
        let probe = Arc::new(ScriptedProbe::new(vec![]));
        let monitor = monitor(probe.clone());
        let mut events = monitor.subscribe();

        monitor.notify(NetworkSignal::Offline);

        assert!(!monitor.is_connected());
        assert_eq!(probe.calls(), 0);
        assert!(matches!(
            events.try_recv().unwrap(),
            ConnectivityEvent::Disconnected { .. }
        ));

        // Already offline: no second event
        monitor.notify(NetworkSignal::Offline);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_online_signal_probes_right_away() {
        let probe = Arc::new(ScriptedProbe::new(vec![]));
        let monitor = ConnectivityMonitor::new(
            probe.clone(),
            MonitorConfig {
                offline_check_interval: Duration::from_secs(600),
                backoff: BackoffPolicy {
                    initial_delay: Duration::from_secs(600),
                    ..BackoffPolicy::default()
                },
                ..MonitorConfig::default()
            },
        );
        let mut events = monitor.subscribe();

        monitor.start();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(probe.calls(), 1);

        monitor.notify(NetworkSignal::Offline);
        assert!(matches!(
            events.recv().await.unwrap(),
            ConnectivityEvent::Disconnected { .. }
        ));

        monitor.notify(NetworkSignal::Online);
        assert!(matches!(
            events.recv().await.unwrap(),
            ConnectivityEvent::Connected { .. }
        ));
        assert_eq!(probe.calls(), 2);

        monitor.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_while_monitoring() {
        let probe = Arc::new(ScriptedProbe::new(vec![]));
        let monitor = ConnectivityMonitor::new(
            probe.clone(),
            MonitorConfig {
                check_interval: Duration::from_secs(30),
                ..MonitorConfig::default()
            },
        );

        monitor.start();
        assert!(monitor.is_monitoring());
        tokio::time::sleep(Duration::from_secs(95)).await;
        // Immediate probe plus one every 30s
        assert_eq!(probe.calls(), 4);

        monitor.stop();
        assert!(!monitor.is_monitoring());
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(probe.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_attempts_follow_backoff() {
        let probe = Arc::new(ScriptedProbe::failing());
        let monitor = monitor(probe.clone());

        monitor.start();
        tokio::time::sleep(Duration::from_secs(60)).await;

        // Probes at 0s then after ~2.3s, ~4.6s, ~9.2s and ~18.4s; the next
        // one is at least 35s further out.
        assert_eq!(probe.calls(), 5);
        let delay = monitor.retry_delay().unwrap();
        assert!(delay > DEFAULT_OFFLINE_CHECK_INTERVAL);
        assert!(delay >= Duration::from_millis(35_200));

        monitor.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ignores_in_flight_probe() {
        let probe = Arc::new(ScriptedProbe::failing().with_delay(Duration::from_secs(5)));
        let monitor = monitor(probe.clone());

        let checker = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.check_connectivity().await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        monitor.stop();

        let state = checker.await.unwrap();
        assert!(state.is_connected);
        assert_eq!(state.consecutive_failures, 0);
        assert!(monitor.is_connected());
    }
}
