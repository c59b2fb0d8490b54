//! Distribution hub: bounded fan-out to subscribers
//!
//! Broadcasts each delta to every interested subscriber's bounded outbound
//! queue without ever waiting on a consumer. A subscriber that cannot keep up
//! hits its queue bound and, per policy, is either disconnected or has its
//! backlog discarded and a fresh snapshot offered. Either way the slow
//! consumer pays; ingestion and the other subscribers are untouched.
//!
//! The hub is synchronous and lock-protected; the async WebSocket tasks wake
//! on a per-subscriber `Notify`, drain their queue, and push frames to the
//! socket outside any lock.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, warn};
use types::ids::NodeKey;

use crate::delta::Delta;
use crate::snapshot::EngineSnapshot;
use crate::subscribers::{SubscriberId, SubscriberRegistry};

/// Policy when a subscriber's outbound queue overflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OverflowPolicy {
    /// Disconnect the lagging subscriber immediately.
    Disconnect,
    /// Drop its backlog and offer a fresh snapshot instead.
    DropOldestAndResnapshot,
}

/// Configuration for the distribution hub.
#[derive(Debug, Clone, Serialize)]
pub struct HubConfig {
    /// Maximum frames queued per subscriber.
    pub queue_capacity: usize,
    /// Overflow policy.
    pub overflow_policy: OverflowPolicy,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            overflow_policy: OverflowPolicy::Disconnect,
        }
    }
}

/// One serialized frame awaiting delivery.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    /// Delta sequence, 0 for snapshot frames.
    pub sequence: u64,
    /// Serialized wire frame.
    pub payload: String,
}

/// Wire frame sent over the WebSocket.
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsFrame<'a> {
    Snapshot { payload: &'a EngineSnapshot },
    Delta {
        #[serde(flatten)]
        delta: &'a Delta,
    },
}

/// Per-subscriber bounded queue.
#[derive(Debug)]
struct SubscriberQueue {
    frames: Vec<OutboundFrame>,
    capacity: usize,
    policy: OverflowPolicy,
    frames_dropped: u64,
    needs_resnapshot: bool,
    disconnected: bool,
    lagging: bool,
}

impl SubscriberQueue {
    fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            frames: Vec::new(),
            capacity,
            policy,
            frames_dropped: 0,
            needs_resnapshot: false,
            disconnected: false,
            lagging: false,
        }
    }

    /// Enqueue one frame. Returns false when the subscriber crossed into the
    /// disconnected state.
    fn enqueue(&mut self, frame: OutboundFrame) -> bool {
        if self.disconnected {
            return false;
        }
        if self.frames.len() >= self.capacity {
            self.lagging = true;
            match self.policy {
                OverflowPolicy::Disconnect => {
                    self.disconnected = true;
                    self.frames.clear();
                    return false;
                }
                OverflowPolicy::DropOldestAndResnapshot => {
                    // The backlog is stale the moment a resnapshot is owed;
                    // keep nothing and wait for the fresh cut.
                    self.frames_dropped += self.frames.len() as u64 + 1;
                    self.frames.clear();
                    self.needs_resnapshot = true;
                    return true;
                }
            }
        }
        if self.needs_resnapshot {
            // Deltas between overflow and resnapshot would double-apply.
            self.frames_dropped += 1;
            return true;
        }
        self.frames.push(frame);
        true
    }

    fn drain(&mut self) -> Vec<OutboundFrame> {
        self.lagging = false;
        std::mem::take(&mut self.frames)
    }
}

/// Result of draining one subscriber's queue.
#[derive(Debug)]
pub struct DrainOutcome {
    pub frames: Vec<OutboundFrame>,
    /// Subscriber overflowed under the Disconnect policy; close the socket.
    pub disconnect: bool,
    /// Subscriber owes a fresh snapshot; the caller must request one from
    /// the engine (which clears this state atomically).
    pub resnapshot: bool,
}

/// Fan-out state for all live subscribers.
pub struct DistributionHub {
    registry: SubscriberRegistry,
    queues: BTreeMap<SubscriberId, SubscriberQueue>,
    notifiers: BTreeMap<SubscriberId, Arc<Notify>>,
    config: HubConfig,
    total_disconnects: u64,
}

impl DistributionHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            registry: SubscriberRegistry::new(),
            queues: BTreeMap::new(),
            notifiers: BTreeMap::new(),
            config,
            total_disconnects: 0,
        }
    }

    /// Register a subscriber; returns its id and wake handle.
    pub fn register(
        &mut self,
        node_filter: Option<NodeKey>,
        now: f64,
    ) -> (SubscriberId, Arc<Notify>) {
        let id = self.registry.register(node_filter, now);
        self.queues.insert(
            id,
            SubscriberQueue::new(self.config.queue_capacity, self.config.overflow_policy),
        );
        let notify = Arc::new(Notify::new());
        self.notifiers.insert(id, notify.clone());
        debug!(subscriber = id, "Registered subscriber");
        (id, notify)
    }

    /// Deregister a subscriber. Idempotent; no further work is done for it.
    pub fn remove(&mut self, id: SubscriberId) {
        self.registry.remove(id);
        self.queues.remove(&id);
        self.notifiers.remove(&id);
        debug!(subscriber = id, "Removed subscriber");
    }

    /// Broadcast one delta to every interested subscriber.
    ///
    /// Serializes once, then enqueues per subscriber without waiting. Queues
    /// that overflow under the Disconnect policy are counted and their
    /// subscribers woken so the socket task can close them.
    pub fn broadcast(&mut self, delta: &Delta) {
        let payload = match serde_json::to_string(&WsFrame::Delta { delta }) {
            Ok(json) => json,
            Err(err) => {
                warn!(error = %err, "Failed to serialize delta frame");
                return;
            }
        };

        for id in self.registry.recipients(&delta.payload) {
            let Some(queue) = self.queues.get_mut(&id) else {
                continue;
            };
            let frame = OutboundFrame {
                sequence: delta.sequence,
                payload: payload.clone(),
            };
            let was_disconnected = queue.disconnected;
            if !queue.enqueue(frame) && !was_disconnected {
                self.total_disconnects += 1;
                warn!(
                    subscriber = id,
                    total_disconnects = self.total_disconnects,
                    "Backpressure: disconnecting lagging subscriber"
                );
            }
            if let Some(notify) = self.notifiers.get(&id) {
                notify.notify_one();
            }
        }
    }

    /// Drain a subscriber's queue for delivery.
    pub fn drain(&mut self, id: SubscriberId) -> DrainOutcome {
        match self.queues.get_mut(&id) {
            Some(queue) => {
                let disconnect = queue.disconnected;
                let resnapshot = queue.needs_resnapshot;
                let frames = if disconnect { Vec::new() } else { queue.drain() };
                DrainOutcome {
                    frames,
                    disconnect,
                    resnapshot,
                }
            }
            None => DrainOutcome {
                frames: Vec::new(),
                disconnect: true,
                resnapshot: false,
            },
        }
    }

    /// Clear a subscriber's resnapshot debt and backlog. Called by the engine
    /// under the state lock, immediately before building the fresh snapshot,
    /// so no delta can slip between the clear and the cut.
    pub fn begin_resnapshot(&mut self, id: SubscriberId) {
        if let Some(queue) = self.queues.get_mut(&id) {
            queue.frames.clear();
            queue.needs_resnapshot = false;
        }
    }

    /// Queue depth for a subscriber.
    pub fn queue_depth(&self, id: SubscriberId) -> usize {
        self.queues.get(&id).map(|q| q.frames.len()).unwrap_or(0)
    }

    /// Frames dropped for a subscriber (DropOldestAndResnapshot policy).
    pub fn frames_dropped(&self, id: SubscriberId) -> u64 {
        self.queues.get(&id).map(|q| q.frames_dropped).unwrap_or(0)
    }

    /// Subscribers currently marked lagging.
    pub fn lagging_subscribers(&self) -> Vec<SubscriberId> {
        self.queues
            .iter()
            .filter(|(_, q)| q.lagging)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.count()
    }

    pub fn total_disconnects(&self) -> u64 {
        self.total_disconnects
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }
}
