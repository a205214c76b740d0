//! Group occupancy placeholders
//!
//! Each server group exposes a `%playerlist-group_<name>%` placeholder holding
//! the number of visible (non-vanished) players currently in that group.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::trace;

/// Computes the current value of a count placeholder
pub type CountSupplier = Arc<dyn Fn() -> usize + Send + Sync>;

/// Registry of placeholders the engine publishes
pub trait PlaceholderRegistry: Send + Sync {
    /// Register (or replace) a count placeholder and compute its first value
    fn register_count(&self, name: &str, supplier: CountSupplier);

    /// Recompute a registered placeholder
    fn refresh(&self, name: &str);
}

/// Placeholder name of a group's occupancy count
pub fn group_placeholder(group: &str) -> String {
    format!("%playerlist-group_{}%", group)
}

struct Slot {
    supplier: CountSupplier,
    value: usize,
}

/// In-memory placeholder registry, read by the management API
#[derive(Default)]
pub struct PlaceholderBoard {
    slots: DashMap<String, Slot>,
}

impl PlaceholderBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last computed value of a placeholder
    pub fn value(&self, name: &str) -> Option<usize> {
        self.slots.get(name).map(|slot| slot.value)
    }

    /// All placeholder values, sorted by name
    pub fn snapshot(&self) -> BTreeMap<String, usize> {
        self.slots
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().value))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl PlaceholderRegistry for PlaceholderBoard {
    fn register_count(&self, name: &str, supplier: CountSupplier) {
        let value = supplier();
        self.slots
            .insert(name.to_string(), Slot { supplier, value });
    }

    fn refresh(&self, name: &str) {
        // The supplier reads player state only, never this board
        let supplier = match self.slots.get(name) {
            Some(slot) => slot.supplier.clone(),
            None => return,
        };
        let value = supplier();
        if let Some(mut slot) = self.slots.get_mut(name) {
            if slot.value != value {
                trace!(placeholder = name, old = slot.value, new = value, "Placeholder updated");
            }
            slot.value = value;
        }
    }
}
