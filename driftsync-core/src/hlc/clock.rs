//! The hybrid logical clock.
//!
//! One clock instance lives for the whole process and is shared by
//! reference (`Arc<HybridLogicalClock>`). Its state is a critical section:
//! every tick goes through a mutex so concurrent `now`/`receive` calls from
//! different tokio worker threads are serialized.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use super::node_id::NodeId;
use super::timestamp::{HlcTimestamp, MAX_COUNTER};

/// Source of wall-clock milliseconds.
pub trait PhysicalClock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// Wall clock backed by `SystemTime`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl PhysicalClock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }
}

/// A wall clock that only moves when told to. Useful for deterministic
/// tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new(millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    pub fn set(&self, millis: u64) {
        self.millis.store(millis, AtomicOrdering::SeqCst);
    }

    pub fn advance(&self, millis: u64) {
        self.millis.fetch_add(millis, AtomicOrdering::SeqCst);
    }
}

impl PhysicalClock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(AtomicOrdering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct ClockState {
    physical_time: u64,
    counter: u16,
}

impl ClockState {
    /// Sets the counter, borrowing a millisecond on overflow. Saturates at
    /// the largest representable timestamp instead of wrapping.
    fn set_counter(&mut self, next: u32) {
        if next <= MAX_COUNTER as u32 {
            self.counter = next as u16;
            return;
        }

        match self.physical_time.checked_add(1) {
            Some(time) => {
                self.physical_time = time;
                self.counter = 0;
            }
            None => {
                tracing::warn!("HLC saturated at the largest representable timestamp");
                self.counter = MAX_COUNTER;
            }
        }
    }

    fn is_behind(&self, remote: &HlcTimestamp) -> bool {
        (remote.physical_time(), remote.counter()) > (self.physical_time, self.counter)
    }
}

/// Hybrid logical clock producing causally ordered, unique timestamps.
pub struct HybridLogicalClock {
    node_id: NodeId,
    physical: Arc<dyn PhysicalClock>,
    state: Mutex<ClockState>,
}

impl HybridLogicalClock {
    /// Creates a clock on the system wall clock.
    pub fn new(node_id: NodeId) -> Self {
        Self::with_physical_clock(node_id, Arc::new(SystemClock))
    }

    pub fn with_physical_clock(node_id: NodeId, physical: Arc<dyn PhysicalClock>) -> Self {
        Self {
            node_id,
            physical,
            state: Mutex::new(ClockState::default()),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Generates a timestamp for a local event.
    ///
    /// Every returned value compares strictly greater than every value
    /// previously returned by `now` or `receive` on this instance.
    pub fn now(&self) -> HlcTimestamp {
        let wall = self.physical.now_millis();
        let mut state = self.lock();

        if wall > state.physical_time {
            state.physical_time = wall;
            state.counter = 0;
        } else {
            let next = state.counter as u32 + 1;
            state.set_counter(next);
        }

        self.snapshot(&state)
    }

    /// Generates a timestamp for the receipt of a remote event.
    ///
    /// The result is strictly greater than both the prior local state and
    /// `remote`, except at `u64::MAX:65535` where the clock saturates.
    pub fn receive(&self, remote: &HlcTimestamp) -> HlcTimestamp {
        let wall = self.physical.now_millis();
        let mut state = self.lock();

        let local_time = state.physical_time;
        let remote_time = remote.physical_time();
        let new_time = wall.max(local_time).max(remote_time);

        let next = if new_time == local_time && new_time == remote_time {
            state.counter.max(remote.counter()) as u32 + 1
        } else if new_time == local_time {
            state.counter as u32 + 1
        } else if new_time == remote_time {
            remote.counter() as u32 + 1
        } else {
            0
        };

        state.physical_time = new_time;
        state.set_counter(next);

        self.snapshot(&state)
    }

    /// Passively adopts `remote` if it is ahead of the local state. Does not
    /// generate a new event.
    pub fn merge(&self, remote: &HlcTimestamp) {
        let mut state = self.lock();
        if state.is_behind(remote) {
            state.physical_time = remote.physical_time();
            state.counter = remote.counter();
        }
    }

    /// The current clock state as a timestamp, without ticking.
    pub fn last(&self) -> HlcTimestamp {
        let state = self.lock();
        self.snapshot(&state)
    }

    pub fn compare(a: &HlcTimestamp, b: &HlcTimestamp) -> Ordering {
        a.cmp(b)
    }

    fn snapshot(&self, state: &ClockState) -> HlcTimestamp {
        HlcTimestamp::new(state.physical_time, state.counter, self.node_id.clone())
    }

    fn lock(&self) -> MutexGuard<'_, ClockState> {
        // The state is two integers; a panic while holding the lock cannot
        // leave it torn.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for HybridLogicalClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridLogicalClock")
            .field("node_id", &self.node_id)
            .field("last", &self.last())
            .finish()
    }
}
