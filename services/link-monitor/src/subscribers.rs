//! Subscriber registry
//!
//! Tracks live subscriptions: identity, optional node filter, and connection
//! metadata. Registration and removal happen under the engine's state lock,
//! which is what makes the snapshot/delta hand-off exact: a subscriber exists
//! either before a mutation (and receives its delta) or after it (and sees it
//! in the snapshot), never neither, never both.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use types::ids::NodeKey;

use crate::delta::DeltaPayload;

/// Unique subscriber identifier, assigned at registration.
pub type SubscriberId = u64;

/// State for one live subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriberState {
    pub id: SubscriberId,
    /// Restricts bucket deltas to one node. Integrity deltas are not
    /// node-scoped and always pass.
    pub node_filter: Option<NodeKey>,
    /// Unix-seconds timestamp of registration.
    pub connected_at: f64,
}

impl SubscriberState {
    /// Whether this subscriber should receive the given delta payload.
    pub fn wants(&self, payload: &DeltaPayload) -> bool {
        match (&self.node_filter, payload.node()) {
            (Some(filter), Some(node)) => filter == node,
            _ => true,
        }
    }
}

/// Registry of live subscribers.
///
/// BTreeMap keyed by id so iteration (and therefore delivery fan-out order)
/// is deterministic.
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    subscribers: BTreeMap<SubscriberId, SubscriberState>,
    next_id: SubscriberId,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self {
            subscribers: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Register a new subscriber and return its id.
    pub fn register(&mut self, node_filter: Option<NodeKey>, now: f64) -> SubscriberId {
        let id = self.next_id;
        self.next_id += 1;
        self.subscribers.insert(
            id,
            SubscriberState {
                id,
                node_filter,
                connected_at: now,
            },
        );
        id
    }

    /// Remove a subscriber. Idempotent.
    pub fn remove(&mut self, id: SubscriberId) -> Option<SubscriberState> {
        self.subscribers.remove(&id)
    }

    pub fn get(&self, id: SubscriberId) -> Option<&SubscriberState> {
        self.subscribers.get(&id)
    }

    /// Subscribers that should receive the given payload, in id order.
    pub fn recipients(&self, payload: &DeltaPayload) -> Vec<SubscriberId> {
        self.subscribers
            .values()
            .filter(|s| s.wants(payload))
            .map(|s| s.id)
            .collect()
    }

    pub fn count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn ids(&self) -> Vec<SubscriberId> {
        self.subscribers.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::Bucket;

    fn bucket_payload(host: &str) -> DeltaPayload {
        DeltaPayload::BucketUpserted {
            node: NodeKey::new(host, "eth0"),
            bucket: Bucket {
                start_ts: 100.0,
                end_ts: 105.0,
                max_bps: 1.0,
                avg_bps: 1.0,
                sample_count: 1,
            },
        }
    }

    #[test]
    fn test_register_assigns_unique_ids() {
        let mut reg = SubscriberRegistry::new();
        let a = reg.register(None, 0.0);
        let b = reg.register(None, 0.0);
        assert_ne!(a, b);
        assert_eq!(reg.count(), 2);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut reg = SubscriberRegistry::new();
        let id = reg.register(None, 0.0);
        assert!(reg.remove(id).is_some());
        assert!(reg.remove(id).is_none());
        assert_eq!(reg.count(), 0);
    }

    #[test]
    fn test_node_filter_scopes_bucket_deltas() {
        let mut reg = SubscriberRegistry::new();
        let filtered = reg.register(Some(NodeKey::new("host-a", "eth0")), 0.0);
        let unfiltered = reg.register(None, 0.0);

        let matching = reg.recipients(&bucket_payload("host-a"));
        assert_eq!(matching, vec![filtered, unfiltered]);

        let other = reg.recipients(&bucket_payload("host-b"));
        assert_eq!(other, vec![unfiltered]);
    }

    #[test]
    fn test_integrity_deltas_pass_all_filters() {
        use crate::correlator::IntegrityEvent;
        use types::ids::{EventId, StreamKey};

        let mut reg = SubscriberRegistry::new();
        let filtered = reg.register(Some(NodeKey::new("host-a", "eth0")), 0.0);

        let payload = DeltaPayload::IntegrityEvent {
            event: IntegrityEvent {
                event_id: EventId::new(),
                stream_key: StreamKey::new("s1"),
                label: "s1".to_string(),
                category: "inc_seq".to_string(),
                timestamp: 1.0,
                timestamp_iso: types::time::isoformat(1.0),
                status: "ok".to_string(),
                is_ok: true,
                detail: None,
                check_type: "inc_seq".to_string(),
                exchange: None,
                symbol: None,
                stage: None,
                results: Vec::new(),
                batch_size: 0,
                batch_failures: 0,
                source: None,
            },
        };
        assert_eq!(reg.recipients(&payload), vec![filtered]);
    }
}
