//! Retention bounds
//!
//! Every unbounded input meets a bounded container here. `BoundedLog` is the
//! single eviction mechanism shared by the bucket timeline, the per-stream
//! event logs, and the alert feed: inserts never fail, eviction always takes
//! from the logically oldest end, and an insert that would exceed capacity
//! evicts exactly the overflow in the same operation — capacity is never
//! exceeded even transiently.
//!
//! Capacity eviction is normal steady-state behavior, not an error, and is
//! counted rather than logged.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

/// Retention configuration for the engine.
///
/// The upstream deployment described its bound as "72 units of data" without
/// naming the unit; here the unit is explicit: `max_buckets_per_node` is a
/// count of buckets. At the probe's default 5-second window the default of 72
/// keeps six minutes of timeline per node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Maximum buckets retained per node (count of buckets, not seconds).
    pub max_buckets_per_node: usize,
    /// Default maximum integrity events retained per stream.
    pub max_events_per_stream: usize,
    /// Per-category overrides of `max_events_per_stream`.
    pub category_event_caps: BTreeMap<String, usize>,
    /// Maximum entries in the global alert feed.
    pub max_alerts: usize,
    /// Tolerance, in seconds, when matching a redelivered window against the
    /// newest bucket's boundaries.
    pub window_match_tolerance_secs: f64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_buckets_per_node: 72,
            max_events_per_stream: 200,
            category_event_caps: BTreeMap::new(),
            max_alerts: 500,
            window_match_tolerance_secs: 0.001,
        }
    }
}

impl RetentionConfig {
    /// Event-log capacity for a stream of the given category.
    pub fn event_cap_for(&self, category: &str) -> usize {
        self.category_event_caps
            .get(category)
            .copied()
            .unwrap_or(self.max_events_per_stream)
    }
}

/// An ordered log bounded to a fixed capacity.
///
/// Append-at-tail, evict-at-head. `push` returns the number of entries
/// evicted so callers can account for them.
#[derive(Debug, Clone)]
pub struct BoundedLog<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedLog<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append an entry, evicting exactly the overflow from the front.
    pub fn push(&mut self, entry: T) -> usize {
        let mut evicted = 0;
        while self.entries.len() >= self.capacity.max(1) {
            self.entries.pop_front();
            evicted += 1;
        }
        self.entries.push_back(entry);
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest entry, if any.
    pub fn front(&self) -> Option<&T> {
        self.entries.front()
    }

    /// Newest entry, if any.
    pub fn back(&self) -> Option<&T> {
        self.entries.back()
    }

    /// Mutable access to the newest entry.
    pub fn back_mut(&mut self) -> Option<&mut T> {
        self.entries.back_mut()
    }

    /// Iterate oldest → newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }
}

impl<T: Clone> BoundedLog<T> {
    /// The most recent `limit` entries, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<T> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }

    /// All entries, oldest first.
    pub fn to_vec(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_within_capacity() {
        let mut log = BoundedLog::new(3);
        assert_eq!(log.push(1), 0);
        assert_eq!(log.push(2), 0);
        assert_eq!(log.push(3), 0);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_push_evicts_exactly_overflow() {
        let mut log = BoundedLog::new(3);
        for i in 0..3 {
            log.push(i);
        }
        assert_eq!(log.push(3), 1);
        assert_eq!(log.len(), 3);
        assert_eq!(log.to_vec(), vec![1, 2, 3]);
    }

    #[test]
    fn test_capacity_never_exceeded() {
        let mut log = BoundedLog::new(5);
        for i in 0..100 {
            log.push(i);
            assert!(log.len() <= 5);
        }
        assert_eq!(log.to_vec(), vec![95, 96, 97, 98, 99]);
    }

    #[test]
    fn test_recent_limits_and_orders() {
        let mut log = BoundedLog::new(10);
        for i in 0..5 {
            log.push(i);
        }
        assert_eq!(log.recent(3), vec![2, 3, 4]);
        assert_eq!(log.recent(100), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_zero_capacity_keeps_one() {
        // A zero cap is nonsensical config; the log degrades to keeping the
        // newest entry rather than rejecting inserts.
        let mut log = BoundedLog::new(0);
        log.push(1);
        log.push(2);
        assert_eq!(log.to_vec(), vec![2]);
    }

    #[test]
    fn test_category_cap_override() {
        let mut cfg = RetentionConfig::default();
        cfg.category_event_caps
            .insert("trade/binance-futures".to_string(), 50);
        assert_eq!(cfg.event_cap_for("trade/binance-futures"), 50);
        assert_eq!(cfg.event_cap_for("rest/5m"), cfg.max_events_per_stream);
    }

    #[test]
    fn test_default_config_documented_values() {
        let cfg = RetentionConfig::default();
        assert_eq!(cfg.max_buckets_per_node, 72);
        assert_eq!(cfg.max_events_per_stream, 200);
        assert!(cfg.window_match_tolerance_secs > 0.0);
    }
}
