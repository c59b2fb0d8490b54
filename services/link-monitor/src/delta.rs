//! Delta stream for incremental subscriber updates
//!
//! Every state mutation the engine applies produces exactly one `Delta`,
//! sequenced under the same lock that applied the mutation, so the delta
//! stream is a total order over mutations. Subscribers reconstruct live
//! state by applying deltas, in order, on top of their initial snapshot;
//! `ReplicaState` implements that client-side application and is also what
//! the replay-consistency tests use.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use types::ids::{NodeKey, StreamKey};

use crate::correlator::IntegrityEvent;
use crate::retention::RetentionConfig;
use crate::snapshot::EngineSnapshot;
use crate::timeline::Bucket;

/// Payload of one state mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "delta_type", rename_all = "snake_case")]
pub enum DeltaPayload {
    /// A bucket was appended to, or refreshed at the tail of, a node's
    /// timeline. Clients key buckets by `(node, start_ts)` and overwrite.
    BucketUpserted { node: NodeKey, bucket: Bucket },
    /// An integrity event was recorded for a stream.
    IntegrityEvent { event: IntegrityEvent },
}

impl DeltaPayload {
    /// Node this delta concerns, for subscriber node filters. Integrity
    /// deltas are not node-scoped and match every filter.
    pub fn node(&self) -> Option<&NodeKey> {
        match self {
            DeltaPayload::BucketUpserted { node, .. } => Some(node),
            DeltaPayload::IntegrityEvent { .. } => None,
        }
    }

    /// Payload kind as a string label for logging.
    pub fn kind_label(&self) -> &'static str {
        match self {
            DeltaPayload::BucketUpserted { .. } => "bucket_upserted",
            DeltaPayload::IntegrityEvent { .. } => "integrity_event",
        }
    }
}

/// One sequenced state mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    /// Position in the total mutation order. Gap-free per engine lifetime.
    pub sequence: u64,
    pub payload: DeltaPayload,
}

/// Errors applying a delta stream to a replica.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplayError {
    #[error("sequence gap: expected {expected}, got {actual}")]
    SequenceGap { expected: u64, actual: u64 },

    #[error("non-monotonic sequence: last={last}, received={received}")]
    NonMonotonic { last: u64, received: u64 },
}

/// Client-side mirror of engine state, built from a snapshot and advanced by
/// deltas. Applies the same retention bounds the engine does, so a replica
/// never diverges from the live state it mirrors.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaState {
    pub nodes: BTreeMap<String, Vec<Bucket>>,
    pub streams: BTreeMap<StreamKey, IntegrityEvent>,
    pub last_sequence: u64,
    config: RetentionConfig,
}

impl ReplicaState {
    /// Seed a replica from a subscriber snapshot.
    pub fn from_snapshot(snapshot: &EngineSnapshot) -> Self {
        Self {
            nodes: snapshot.nodes.clone(),
            streams: snapshot
                .streams
                .iter()
                .map(|(key, stream)| (key.clone(), stream.last_event.clone()))
                .collect(),
            last_sequence: snapshot.last_sequence,
            config: snapshot.config.clone(),
        }
    }

    /// Apply one delta. Sequences must be exactly consecutive.
    pub fn apply(&mut self, delta: &Delta) -> Result<(), ReplayError> {
        let expected = self.last_sequence + 1;
        if delta.sequence < expected {
            return Err(ReplayError::NonMonotonic {
                last: self.last_sequence,
                received: delta.sequence,
            });
        }
        if delta.sequence > expected {
            return Err(ReplayError::SequenceGap {
                expected,
                actual: delta.sequence,
            });
        }

        match &delta.payload {
            DeltaPayload::BucketUpserted { node, bucket } => {
                let tolerance = self.config.window_match_tolerance_secs;
                let cap = self.config.max_buckets_per_node.max(1);
                let timeline = self.nodes.entry(node.to_string()).or_default();
                let matches_tail = timeline
                    .last()
                    .map_or(false, |newest| (bucket.start_ts - newest.start_ts).abs() <= tolerance);
                if matches_tail {
                    if let Some(newest) = timeline.last_mut() {
                        *newest = bucket.clone();
                    }
                } else {
                    timeline.push(bucket.clone());
                    if timeline.len() > cap {
                        let excess = timeline.len() - cap;
                        timeline.drain(..excess);
                    }
                }
            }
            DeltaPayload::IntegrityEvent { event } => {
                match self.streams.entry(event.stream_key.clone()) {
                    Entry::Occupied(mut slot) => {
                        // An older event must not revert the status table;
                        // equal timestamps defer to the later arrival.
                        if event.timestamp >= slot.get().timestamp {
                            slot.insert(event.clone());
                        }
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(event.clone());
                    }
                }
            }
        }

        self.last_sequence = delta.sequence;
        Ok(())
    }

    /// Apply a batch of deltas in order.
    pub fn apply_all(&mut self, deltas: &[Delta]) -> Result<(), ReplayError> {
        for delta in deltas {
            self.apply(delta)?;
        }
        Ok(())
    }
}
