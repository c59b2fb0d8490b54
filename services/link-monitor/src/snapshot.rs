//! Subscriber snapshots
//!
//! A snapshot is the complete engine state — every node's bucket sequence,
//! every known stream's last-known status, and the alert feed — captured as
//! one internally consistent cut. It is delivered exactly once per
//! subscription, before any deltas, and is versioned and checksummed so
//! clients and tests can verify consistency.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use types::ids::StreamKey;

use crate::correlator::IntegrityEvent;
use crate::retention::RetentionConfig;
use crate::timeline::Bucket;

/// One known stream as carried in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotStream {
    pub label: String,
    pub category: String,
    pub last_event: IntegrityEvent,
}

/// A versioned, checksummed snapshot of the full engine state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    /// Monotonic snapshot version.
    pub version: u64,
    /// Last mutation sequence included in this snapshot. The first delta a
    /// fresh subscriber sees must carry `last_sequence + 1`.
    pub last_sequence: u64,
    /// Unix-seconds timestamp when the snapshot was taken.
    pub timestamp: f64,
    /// Engine retention configuration, so replicas enforce the same bounds.
    pub config: RetentionConfig,
    /// Node key (textual form) → ascending bucket sequence.
    pub nodes: BTreeMap<String, Vec<Bucket>>,
    /// Stream key → stream metadata + last-known status.
    pub streams: BTreeMap<StreamKey, SnapshotStream>,
    /// Alert feed, oldest first.
    pub alerts: Vec<IntegrityEvent>,
    /// SHA-256 checksum of the snapshot content.
    pub checksum: String,
}

/// Builds versioned snapshots. Owned by the engine; `build` is only called
/// under the state lock, so versions order consistently with sequences.
pub struct SnapshotBuilder {
    version_counter: u64,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self { version_counter: 0 }
    }

    pub fn build(
        &mut self,
        nodes: &BTreeMap<String, Vec<Bucket>>,
        streams: &BTreeMap<StreamKey, SnapshotStream>,
        alerts: &[IntegrityEvent],
        last_sequence: u64,
        config: RetentionConfig,
        timestamp: f64,
    ) -> EngineSnapshot {
        self.version_counter += 1;
        let checksum = compute_checksum(nodes, streams, last_sequence);
        EngineSnapshot {
            version: self.version_counter,
            last_sequence,
            timestamp,
            config,
            nodes: nodes.clone(),
            streams: streams.clone(),
            alerts: alerts.to_vec(),
            checksum,
        }
    }

    /// Current snapshot version.
    pub fn current_version(&self) -> u64 {
        self.version_counter
    }
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute a SHA-256 checksum over the snapshot content.
///
/// Iteration is over BTreeMaps, so the digest is deterministic for a given
/// state regardless of insertion history.
fn compute_checksum(
    nodes: &BTreeMap<String, Vec<Bucket>>,
    streams: &BTreeMap<StreamKey, SnapshotStream>,
    last_sequence: u64,
) -> String {
    let mut hasher = Sha256::new();

    for (node, buckets) in nodes {
        hasher.update(node.as_bytes());
        hasher.update(b"|");
        for bucket in buckets {
            hasher.update(bucket.start_ts.to_bits().to_le_bytes());
            hasher.update(bucket.end_ts.to_bits().to_le_bytes());
            hasher.update(bucket.max_bps.to_bits().to_le_bytes());
            hasher.update(bucket.avg_bps.to_bits().to_le_bytes());
            hasher.update(bucket.sample_count.to_le_bytes());
            hasher.update(b",");
        }
        hasher.update(b"---");
    }
    hasher.update(b"===");

    for (key, stream) in streams {
        hasher.update(key.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(stream.last_event.event_id.to_string().as_bytes());
        hasher.update(stream.last_event.timestamp.to_bits().to_le_bytes());
        hasher.update(stream.last_event.status.as_bytes());
        hasher.update(b",");
    }
    hasher.update(b"===");

    hasher.update(last_sequence.to_le_bytes());

    format!("{:x}", hasher.finalize())
}

/// Verify that a snapshot's checksum matches its content.
pub fn verify_snapshot_integrity(snapshot: &EngineSnapshot) -> bool {
    let expected =
        compute_checksum(&snapshot.nodes, &snapshot.streams, snapshot.last_sequence);
    snapshot.checksum == expected
}

/// Validate that a delta stream lines up with a snapshot: the first delta
/// after a snapshot must carry exactly the next sequence, or a mutation was
/// duplicated or lost across the subscription boundary.
pub fn validate_snapshot_delta_sync(
    snapshot: &EngineSnapshot,
    first_delta_sequence: u64,
) -> bool {
    first_delta_sequence == snapshot.last_sequence + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::ids::EventId;

    fn make_bucket(start: f64) -> Bucket {
        Bucket {
            start_ts: start,
            end_ts: start + 5.0,
            max_bps: 1e6,
            avg_bps: 2.5e5,
            sample_count: 500,
        }
    }

    fn make_stream(key: &str, ts: f64) -> (StreamKey, SnapshotStream) {
        let event = IntegrityEvent {
            event_id: EventId::new(),
            stream_key: StreamKey::new(key),
            label: key.to_string(),
            category: "inc_seq".to_string(),
            timestamp: ts,
            timestamp_iso: types::time::isoformat(ts),
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
        };
        (
            StreamKey::new(key),
            SnapshotStream {
                label: key.to_string(),
                category: "inc_seq".to_string(),
                last_event: event,
            },
        )
    }

    fn populated() -> (BTreeMap<String, Vec<Bucket>>, BTreeMap<StreamKey, SnapshotStream>) {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "h|eth0".to_string(),
            vec![make_bucket(100.0), make_bucket(105.0)],
        );
        let mut streams = BTreeMap::new();
        let (key, stream) = make_stream("s1", 100.0);
        streams.insert(key, stream);
        (nodes, streams)
    }

    #[test]
    fn test_build_snapshot() {
        let (nodes, streams) = populated();
        let mut builder = SnapshotBuilder::new();
        let snap = builder.build(&nodes, &streams, &[], 42, RetentionConfig::default(), 1000.0);

        assert_eq!(snap.version, 1);
        assert_eq!(snap.last_sequence, 42);
        assert_eq!(snap.nodes["h|eth0"].len(), 2);
        assert_eq!(snap.streams.len(), 1);
        assert!(!snap.checksum.is_empty());
    }

    #[test]
    fn test_snapshot_versioning() {
        let (nodes, streams) = populated();
        let mut builder = SnapshotBuilder::new();
        let s1 = builder.build(&nodes, &streams, &[], 1, RetentionConfig::default(), 0.0);
        let s2 = builder.build(&nodes, &streams, &[], 1, RetentionConfig::default(), 0.0);
        assert_eq!(s1.version, 1);
        assert_eq!(s2.version, 2);
    }

    #[test]
    fn test_snapshot_integrity() {
        let (nodes, streams) = populated();
        let mut builder = SnapshotBuilder::new();
        let snap = builder.build(&nodes, &streams, &[], 7, RetentionConfig::default(), 0.0);
        assert!(verify_snapshot_integrity(&snap));

        let mut tampered = snap.clone();
        tampered.checksum = "corrupted".to_string();
        assert!(!verify_snapshot_integrity(&tampered));
    }

    #[test]
    fn test_deterministic_checksum() {
        let (nodes, streams) = populated();
        let c1 = compute_checksum(&nodes, &streams, 7);
        let c2 = compute_checksum(&nodes, &streams, 7);
        assert_eq!(c1, c2);

        let c3 = compute_checksum(&nodes, &streams, 8);
        assert_ne!(c1, c3);
    }

    #[test]
    fn test_snapshot_serialization() {
        let (nodes, streams) = populated();
        let mut builder = SnapshotBuilder::new();
        let snap = builder.build(&nodes, &streams, &[], 7, RetentionConfig::default(), 0.0);
        let json = serde_json::to_string(&snap).unwrap();
        let deserialized: EngineSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snap, deserialized);
    }

    #[test]
    fn test_snapshot_delta_sync_validation() {
        let (nodes, streams) = populated();
        let mut builder = SnapshotBuilder::new();
        let snap = builder.build(&nodes, &streams, &[], 10, RetentionConfig::default(), 0.0);

        assert!(validate_snapshot_delta_sync(&snap, 11));
        // A repeated or skipped mutation is a contract violation either way.
        assert!(!validate_snapshot_delta_sync(&snap, 10));
        assert!(!validate_snapshot_delta_sync(&snap, 12));
    }
}
