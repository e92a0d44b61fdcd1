//! Age Index Module
//!
//! Orders keys by creation time for oldest-first eviction.

use std::collections::{BTreeMap, HashMap};

// == Age Index ==
/// Tracks insertion order of keys by `created_at`.
///
/// Ties on `created_at` are broken by insertion sequence, so two keys written
/// in the same millisecond still evict in the order they were written.
#[derive(Debug, Default)]
pub struct AgeIndex {
    /// (created_at, sequence) -> key, oldest first
    order: BTreeMap<(u64, u64), String>,
    /// key -> its slot in `order`
    slots: HashMap<String, (u64, u64)>,
    next_seq: u64,
}

impl AgeIndex {
    // == Constructor ==
    pub fn new() -> Self {
        Self::default()
    }

    // == Insert ==
    /// Records `key` as created at `created_at`, replacing any earlier slot.
    pub fn insert(&mut self, key: &str, created_at: u64) {
        self.remove(key);
        let slot = (created_at, self.next_seq);
        self.next_seq += 1;
        self.order.insert(slot, key.to_string());
        self.slots.insert(key.to_string(), slot);
    }

    // == Remove ==
    pub fn remove(&mut self, key: &str) {
        if let Some(slot) = self.slots.remove(key) {
            self.order.remove(&slot);
        }
    }

    // == Pop Oldest ==
    /// Returns and removes the oldest key.
    pub fn pop_oldest(&mut self) -> Option<String> {
        let (_, key) = self.order.pop_first()?;
        self.slots.remove(&key);
        Some(key)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.slots.clear();
    }
}
