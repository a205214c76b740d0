//! Deferred task execution
//!
//! The engine debounces join/quit/switch races by running work after a short
//! delay. Production code runs on tokio timers; tests drive time by hand with
//! [`ManualScheduler`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::trace;

use crate::error::{Result, SyncError};

/// A unit of deferred work
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks after a delay
pub trait Scheduler: Send + Sync {
    fn run_after(&self, delay: Duration, task: Task);
}

/// Source of the current instant
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Scheduler backed by the tokio runtime
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Create a scheduler on the runtime of the calling task
    pub fn current() -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| SyncError::Internal(format!("No tokio runtime: {}", e)))?;
        Ok(Self::new(handle))
    }
}

impl Scheduler for TokioScheduler {
    fn run_after(&self, delay: Duration, task: Task) {
        self.handle.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            task();
        });
    }
}

struct PendingTask {
    due: Duration,
    seq: u64,
    task: Task,
}

#[derive(Default)]
struct ManualState {
    elapsed: Duration,
    next_seq: u64,
    queue: Vec<PendingTask>,
}

/// Tick-driven scheduler and clock.
///
/// Time only moves when [`ManualScheduler::advance`] is called. Tasks due at
/// the same instant run in submission order.
pub struct ManualScheduler {
    base: Instant,
    state: Mutex<ManualState>,
}

impl ManualScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            base: Instant::now(),
            state: Mutex::new(ManualState::default()),
        })
    }

    /// Time elapsed since creation
    pub fn elapsed(&self) -> Duration {
        self.state.lock().elapsed
    }

    /// Number of tasks not yet run
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Move time forward, running every task that becomes due
    pub fn advance(&self, by: Duration) {
        let target = self.elapsed() + by;
        while let Some(task) = self.pop_due(target) {
            task();
        }
        self.state.lock().elapsed = target;
    }

    /// Run tasks that are already due without moving time
    pub fn run_pending(&self) {
        self.advance(Duration::ZERO);
    }

    // Tasks run without the lock held so they may schedule more work
    fn pop_due(&self, target: Duration) -> Option<Task> {
        let mut state = self.state.lock();
        let index = state
            .queue
            .iter()
            .enumerate()
            .filter(|(_, pending)| pending.due <= target)
            .min_by_key(|(_, pending)| (pending.due, pending.seq))
            .map(|(index, _)| index)?;
        let pending = state.queue.swap_remove(index);
        if pending.due > state.elapsed {
            state.elapsed = pending.due;
        }
        trace!(due = ?pending.due, seq = pending.seq, "Running scheduled task");
        Some(pending.task)
    }
}

impl Scheduler for ManualScheduler {
    fn run_after(&self, delay: Duration, task: Task) {
        let mut state = self.state.lock();
        let due = state.elapsed + delay;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.queue.push(PendingTask { due, seq, task });
    }
}

impl Clock for ManualScheduler {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }
}
