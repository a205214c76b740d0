//! Server switch timestamps
//!
//! Remembers when each player last changed server, so backend removals that
//! race a switch can be told apart from real disconnects.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use uuid::Uuid;

/// Last switch instant per account id
#[derive(Debug, Default)]
pub struct SwitchTracker {
    switches: DashMap<Uuid, Instant>,
}

impl SwitchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a switch
    pub fn record(&self, id: Uuid, at: Instant) {
        self.switches.insert(id, at);
    }

    pub fn last_switch(&self, id: Uuid) -> Option<Instant> {
        self.switches.get(&id).map(|at| *at)
    }

    /// Check if the player switched less than `window` before `now`
    pub fn switched_within(&self, id: Uuid, now: Instant, window: Duration) -> bool {
        match self.last_switch(id) {
            Some(at) => now.saturating_duration_since(at) < window,
            None => false,
        }
    }

    pub fn forget(&self, id: Uuid) {
        self.switches.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.switches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.switches.is_empty()
    }
}
