//! Monitor engine: single mutation owner
//!
//! Composes the timelines, the correlator, and the distribution hub behind
//! one state lock. Every mutation — bucket upsert or integrity event — is
//! applied and sequenced under that lock and broadcast before it is
//! released, so the delta stream is a total order over mutations and every
//! subscriber snapshot is a consistent cut.
//!
//! Subscription takes the same lock: a mutation concurrent with a new
//! subscription lands in exactly one of the subscriber's snapshot or its
//! first delta. Broadcast itself never waits on a consumer (bounded queues,
//! see `hub`), so the critical section stays short.

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::Notify;
use tracing::{info, warn};
use types::errors::IngestError;
use types::ids::{NodeKey, StreamKey};

use crate::correlator::{
    compute_bucket_snapshots, BucketSnapshot, EventFilter, IntegrityCorrelator,
    IntegrityEvent, StreamMeta,
};
use crate::delta::{Delta, DeltaPayload};
use crate::hub::{DistributionHub, DrainOutcome, HubConfig};
use crate::identity::resolve_check;
use crate::ingest::{parse_envelope, IngestStats};
use crate::messages::{BandwidthSample, IntegrityCheck, MonitorMessage};
use crate::metrics::ServiceMetrics;
use crate::retention::RetentionConfig;
use crate::snapshot::{EngineSnapshot, SnapshotBuilder, SnapshotStream};
use crate::subscribers::SubscriberId;
use crate::timeline::{BucketTimeline, UpsertOutcome};

/// Engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub retention: RetentionConfig,
    pub hub: HubConfig,
}

/// Producer-facing result of one ingest call. Ingestion is total: problems
/// are reported here and in diagnostics, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A live subscription: the initial snapshot plus the wake handle for the
/// delta queue.
pub struct Subscription {
    pub id: SubscriberId,
    pub snapshot: EngineSnapshot,
    pub notify: Arc<Notify>,
}

/// Read-only status summary for `/api/status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub retention: RetentionConfig,
    pub queue_capacity: usize,
    pub stats: IngestStats,
    pub node_count: usize,
    pub stream_count: usize,
    pub subscriber_count: usize,
    /// Liveness facts derived from the most recent bucket, if any.
    pub latest: Option<LatestBucket>,
}

/// Summary of the most recently updated bucket across all nodes.
#[derive(Debug, Clone, Serialize)]
pub struct LatestBucket {
    pub node: String,
    pub window_seconds: f64,
    /// Probe tick interval inferred from the window, milliseconds.
    pub tick_ms: f64,
    pub end_ts: f64,
}

/// Mutable engine state, guarded by one lock.
struct EngineState {
    timelines: BTreeMap<NodeKey, BucketTimeline>,
    correlator: IntegrityCorrelator,
    sequence: u64,
    stats: IngestStats,
    snapshots: SnapshotBuilder,
}

/// The ingestion, correlation, and distribution engine.
pub struct MonitorEngine {
    config: EngineConfig,
    state: RwLock<EngineState>,
    hub: Mutex<DistributionHub>,
    metrics: ServiceMetrics,
}

impl MonitorEngine {
    pub fn new(config: EngineConfig) -> Self {
        let state = EngineState {
            timelines: BTreeMap::new(),
            correlator: IntegrityCorrelator::new(config.retention.clone()),
            sequence: 0,
            stats: IngestStats::default(),
            snapshots: SnapshotBuilder::new(),
        };
        let hub = DistributionHub::new(config.hub.clone());
        Self {
            config,
            state: RwLock::new(state),
            hub: Mutex::new(hub),
            metrics: ServiceMetrics::new(),
        }
    }

    pub fn metrics(&self) -> &ServiceMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ingestion ----------------------------------------------------------

    /// Ingest one raw producer envelope. Total: malformed input is counted,
    /// logged, and reported, never raised.
    pub fn ingest_json(&self, raw: &serde_json::Value) -> IngestReport {
        let start = Instant::now();
        let report = match parse_envelope(raw) {
            Ok(message) => self.apply_message(message),
            Err(err) => self.reject(err),
        };
        self.metrics.record_ingest(start.elapsed().as_nanos() as u64);
        report
    }

    /// Apply one normalized message.
    pub fn apply_message(&self, message: MonitorMessage) -> IngestReport {
        match message {
            MonitorMessage::Bandwidth(sample) => self.apply_sample(sample),
            MonitorMessage::Integrity(check) => self.apply_check(check),
        }
    }

    fn apply_sample(&self, sample: BandwidthSample) -> IngestReport {
        let node = NodeKey::new(sample.hostname.clone(), sample.interface.clone());

        let mut state = self.state.write().expect("state lock poisoned");
        let is_new_node = !state.timelines.contains_key(&node);

        let result = {
            let timeline = state
                .timelines
                .entry(node.clone())
                .or_insert_with(|| BucketTimeline::new(node.clone(), &self.config.retention));
            timeline.upsert_sample(&sample).map(|outcome| {
                let bucket = timeline
                    .newest()
                    .cloned()
                    .expect("upsert left a newest bucket");
                (outcome, bucket)
            })
        };

        match result {
            Ok((outcome, bucket)) => {
                if is_new_node {
                    info!(node = %node, "First bandwidth sample for new node");
                }
                if let UpsertOutcome::Appended { evicted } = outcome {
                    state.stats.buckets_evicted += evicted as u64;
                    self.metrics
                        .buckets_evicted
                        .fetch_add(evicted as u64, Ordering::Relaxed);
                }
                state.stats.samples_accepted += 1;
                self.metrics.samples_ingested.fetch_add(1, Ordering::Relaxed);

                state.sequence += 1;
                let delta = Delta {
                    sequence: state.sequence,
                    payload: DeltaPayload::BucketUpserted { node, bucket },
                };
                self.broadcast_locked(&delta);
                IngestReport {
                    accepted: true,
                    reason: None,
                }
            }
            Err(err) => {
                state.stats.out_of_order_dropped += 1;
                self.metrics
                    .out_of_order_dropped
                    .fetch_add(1, Ordering::Relaxed);
                IngestReport {
                    accepted: false,
                    reason: Some(err.to_string()),
                }
            }
        }
    }

    fn apply_check(&self, check: IntegrityCheck) -> IngestReport {
        let identity = resolve_check(&check);
        let event = IntegrityEvent::from_check(check, &identity);

        let mut state = self.state.write().expect("state lock poisoned");
        let outcome = state.correlator.record(event.clone());

        state.stats.checks_accepted += 1;
        state.stats.events_evicted += outcome.evicted as u64;
        self.metrics.checks_ingested.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .events_evicted
            .fetch_add(outcome.evicted as u64, Ordering::Relaxed);

        state.sequence += 1;
        let delta = Delta {
            sequence: state.sequence,
            payload: DeltaPayload::IntegrityEvent { event },
        };
        self.broadcast_locked(&delta);

        IngestReport {
            accepted: true,
            reason: None,
        }
    }

    fn reject(&self, err: IngestError) -> IngestReport {
        warn!(error = %err, "Skipping malformed producer message");
        self.metrics.malformed_dropped.fetch_add(1, Ordering::Relaxed);
        self.state
            .write()
            .expect("state lock poisoned")
            .stats
            .malformed_dropped += 1;
        IngestReport {
            accepted: false,
            reason: Some(err.to_string()),
        }
    }

    /// Broadcast under the state lock so deltas leave in sequence order.
    fn broadcast_locked(&self, delta: &Delta) {
        let mut hub = self.hub.lock().expect("hub lock poisoned");
        hub.broadcast(delta);
        self.metrics.deltas_broadcast.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .backpressure_disconnects
            .store(hub.total_disconnects(), Ordering::Relaxed);
    }

    // distribution -------------------------------------------------------

    /// Attach a subscriber: registers it and captures its snapshot in one
    /// critical section, establishing the exactly-once boundary between the
    /// snapshot and the first delta.
    pub fn subscribe(&self, node_filter: Option<NodeKey>, now: f64) -> Subscription {
        let mut state = self.state.write().expect("state lock poisoned");
        let mut hub = self.hub.lock().expect("hub lock poisoned");
        let (id, notify) = hub.register(node_filter, now);
        let snapshot = self.build_snapshot_locked(&mut state, now);
        self.metrics
            .subscribers_connected
            .store(hub.subscriber_count() as u64, Ordering::Relaxed);
        Subscription {
            id,
            snapshot,
            notify,
        }
    }

    /// Detach a subscriber. Idempotent; immediately stops all work for it.
    pub fn unsubscribe(&self, id: SubscriberId) {
        let mut hub = self.hub.lock().expect("hub lock poisoned");
        hub.remove(id);
        self.metrics
            .subscribers_connected
            .store(hub.subscriber_count() as u64, Ordering::Relaxed);
    }

    /// Drain a subscriber's pending frames.
    pub fn drain(&self, id: SubscriberId) -> DrainOutcome {
        self.hub.lock().expect("hub lock poisoned").drain(id)
    }

    /// Build the fresh snapshot owed to a subscriber under the
    /// DropOldestAndResnapshot policy. Clears its backlog atomically with
    /// the cut, so subsequent deltas line up with the snapshot.
    pub fn resnapshot(&self, id: SubscriberId, now: f64) -> EngineSnapshot {
        let mut state = self.state.write().expect("state lock poisoned");
        let mut hub = self.hub.lock().expect("hub lock poisoned");
        hub.begin_resnapshot(id);
        self.build_snapshot_locked(&mut state, now)
    }

    /// Capture the full current state. Takes the write lock: snapshot
    /// versions must order consistently with mutation sequences.
    pub fn snapshot_now(&self, now: f64) -> EngineSnapshot {
        let mut state = self.state.write().expect("state lock poisoned");
        self.build_snapshot_locked(&mut state, now)
    }

    fn build_snapshot_locked(&self, state: &mut EngineState, now: f64) -> EngineSnapshot {
        let nodes: BTreeMap<String, Vec<crate::timeline::Bucket>> = state
            .timelines
            .iter()
            .map(|(node, timeline)| (node.to_string(), timeline.get_recent(usize::MAX)))
            .collect();

        let streams: BTreeMap<StreamKey, SnapshotStream> = state
            .correlator
            .stream_meta()
            .into_iter()
            .filter_map(|meta| {
                state.correlator.last_known(&meta.key).map(|event| {
                    (
                        meta.key.clone(),
                        SnapshotStream {
                            label: meta.label,
                            category: meta.category,
                            last_event: event.clone(),
                        },
                    )
                })
            })
            .collect();

        let alerts = state.correlator.all_alerts();
        let sequence = state.sequence;
        let snapshot = state.snapshots.build(
            &nodes,
            &streams,
            &alerts,
            sequence,
            self.config.retention.clone(),
            now,
        );
        self.metrics.snapshots_built.fetch_add(1, Ordering::Relaxed);
        snapshot
    }

    // queries ------------------------------------------------------------

    /// Current limits, stats, and liveness summary.
    pub fn status(&self) -> StatusReport {
        let state = self.state.read().expect("state lock poisoned");
        let subscriber_count = self
            .hub
            .lock()
            .expect("hub lock poisoned")
            .subscriber_count();

        let latest = state
            .timelines
            .iter()
            .filter_map(|(node, tl)| tl.newest().map(|b| (node, b.clone())))
            .max_by(|(_, a), (_, b)| a.end_ts.total_cmp(&b.end_ts))
            .map(|(node, bucket)| {
                let window = bucket.window_secs();
                let tick_ms = if bucket.sample_count > 0 && window > 0.0 {
                    window / bucket.sample_count as f64 * 1000.0
                } else {
                    0.0
                };
                LatestBucket {
                    node: node.to_string(),
                    window_seconds: window,
                    tick_ms,
                    end_ts: bucket.end_ts,
                }
            });

        StatusReport {
            retention: self.config.retention.clone(),
            queue_capacity: self.config.hub.queue_capacity,
            stats: state.stats.clone(),
            node_count: state.timelines.len(),
            stream_count: state.correlator.stream_count(),
            subscriber_count,
            latest,
        }
    }

    /// Buckets for one node (or all nodes), ascending in time. Unknown nodes
    /// yield an empty map, not an error.
    pub fn buckets(
        &self,
        node: Option<&NodeKey>,
        limit: Option<usize>,
        since: Option<f64>,
        until: Option<f64>,
    ) -> BTreeMap<String, Vec<crate::timeline::Bucket>> {
        let state = self.state.read().expect("state lock poisoned");
        let select = |tl: &BucketTimeline| {
            let mut buckets = tl.in_range(since, until);
            if let Some(limit) = limit {
                let skip = buckets.len().saturating_sub(limit);
                buckets.drain(..skip);
            }
            buckets
        };

        match node {
            Some(node) => state
                .timelines
                .get(node)
                .map(|tl| {
                    let mut out = BTreeMap::new();
                    out.insert(node.to_string(), select(tl));
                    out
                })
                .unwrap_or_default(),
            None => state
                .timelines
                .iter()
                .map(|(node, tl)| (node.to_string(), select(tl)))
                .collect(),
        }
    }

    /// Filtered integrity events, ascending in time.
    pub fn integrity(&self, filter: &EventFilter, limit: Option<usize>) -> Vec<IntegrityEvent> {
        self.state
            .read()
            .expect("state lock poisoned")
            .correlator
            .events(filter, limit)
    }

    /// Known-stream metadata, sorted by key.
    pub fn stream_meta(&self) -> Vec<StreamMeta> {
        self.state
            .read()
            .expect("state lock poisoned")
            .correlator
            .stream_meta()
    }

    /// The most recent alerts, oldest first.
    pub fn alerts(&self, limit: usize) -> Vec<IntegrityEvent> {
        self.state
            .read()
            .expect("state lock poisoned")
            .correlator
            .alerts(limit)
    }

    /// Recent buckets for a node, each paired with the integrity status of
    /// every stream as of that bucket's close.
    pub fn correlated(&self, node: &NodeKey, limit: usize) -> Vec<BucketSnapshot> {
        let state = self.state.read().expect("state lock poisoned");
        let buckets = state
            .timelines
            .get(node)
            .map(|tl| tl.get_recent(limit))
            .unwrap_or_default();
        let events = state.correlator.all_events();
        compute_bucket_snapshots(&buckets, &events)
    }
}
