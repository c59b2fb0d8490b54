//! Integrity correlator
//!
//! Tracks, per check stream, the last-known integrity status and a bounded
//! event log, and aligns those slow-cadence events against the fast-cadence
//! bucket timeline. The stream table entry — not the log entry — is the
//! carrier of "current status": a stream object is never deleted, and its
//! last-known event survives even if the log empties under eviction.
//!
//! `compute_bucket_snapshots` is the correlation algorithm: one forward pass
//! over events and buckets together, O(events + buckets), never
//! O(events × buckets).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use types::ids::{EventId, StreamKey};
use types::time::{isoformat, UnixSeconds};

use crate::identity::ResolvedIdentity;
use crate::messages::{IntegrityCheck, SubResult};
use crate::retention::{BoundedLog, RetentionConfig};
use crate::timeline::Bucket;

/// A fully resolved integrity event: the normalized check plus the canonical
/// identity of the stream it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityEvent {
    pub event_id: EventId,
    pub stream_key: StreamKey,
    pub label: String,
    pub category: String,
    pub timestamp: UnixSeconds,
    /// ISO-8601 rendering of `timestamp`, for display.
    pub timestamp_iso: String,
    /// Lowercased status string; `ok` is healthy, anything else is not.
    pub status: String,
    pub is_ok: bool,
    pub detail: Option<String>,
    pub check_type: String,
    pub exchange: Option<String>,
    pub symbol: Option<String>,
    pub stage: Option<String>,
    pub results: Vec<SubResult>,
    pub batch_size: u32,
    pub batch_failures: u32,
    pub source: Option<String>,
}

impl IntegrityEvent {
    /// Combine a normalized check with its resolved identity.
    pub fn from_check(check: IntegrityCheck, identity: &ResolvedIdentity) -> Self {
        Self {
            event_id: check.event_id,
            stream_key: identity.key.clone(),
            label: identity.label.clone(),
            category: identity.category.clone(),
            timestamp: check.timestamp,
            timestamp_iso: isoformat(check.timestamp),
            status: check.status,
            is_ok: check.is_ok,
            detail: check.detail,
            check_type: check.check_type,
            exchange: check.exchange,
            symbol: check.symbol,
            stage: check.stage,
            results: check.results,
            batch_size: check.batch_size,
            batch_failures: check.batch_failures,
            source: check.source,
        }
    }
}

/// Metadata for one known stream, as exposed to consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMeta {
    pub key: StreamKey,
    pub label: String,
    pub category: String,
    pub last_status: String,
    pub last_ok: bool,
    pub last_timestamp: UnixSeconds,
}

/// Outcome of recording one event, for logging and delta emission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOutcome {
    pub new_stream: bool,
    pub alerted: bool,
    pub evicted: usize,
}

/// Per-stream state: the last-known event plus the bounded log.
#[derive(Debug, Clone)]
struct StreamState {
    label: String,
    category: String,
    last_event: IntegrityEvent,
    log: BoundedLog<IntegrityEvent>,
}

/// Query filter for the event log.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub stream: Option<StreamKey>,
    pub category: Option<String>,
    pub status: Option<String>,
    pub since: Option<f64>,
    pub until: Option<f64>,
}

/// Last-known-status table plus bounded per-stream event logs.
#[derive(Debug, Clone)]
pub struct IntegrityCorrelator {
    streams: BTreeMap<StreamKey, StreamState>,
    alerts: BoundedLog<IntegrityEvent>,
    config: RetentionConfig,
}

impl IntegrityCorrelator {
    pub fn new(config: RetentionConfig) -> Self {
        let alerts = BoundedLog::new(config.max_alerts);
        Self {
            streams: BTreeMap::new(),
            alerts,
            config,
        }
    }

    /// Record one resolved event.
    ///
    /// Appends to the stream's log (evicting the oldest on overflow) and
    /// overwrites the last-known entry if this event's timestamp is the
    /// newest seen for the key — ties broken by arrival order, so an equal
    /// timestamp wins. Not-ok events additionally land in the alert feed.
    pub fn record(&mut self, event: IntegrityEvent) -> RecordOutcome {
        let key = event.stream_key.clone();
        let mut new_stream = false;

        let state = self.streams.entry(key.clone()).or_insert_with(|| {
            new_stream = true;
            StreamState {
                label: event.label.clone(),
                category: event.category.clone(),
                last_event: event.clone(),
                log: BoundedLog::new(self.config.event_cap_for(&event.category)),
            }
        });

        if new_stream {
            info!(
                key = %key,
                category = %event.category,
                "First event for new stream"
            );
        } else if event.timestamp >= state.last_event.timestamp {
            state.last_event = event.clone();
        }
        // Labels can gain fields as richer events arrive; keep the latest.
        state.label = event.label.clone();

        let evicted = state.log.push(event.clone());

        let alerted = !event.is_ok;
        if alerted {
            warn!(
                key = %key,
                status = %event.status,
                detail = event.detail.as_deref().unwrap_or(""),
                "Integrity check not ok"
            );
            self.alerts.push(event);
        }

        RecordOutcome {
            new_stream,
            alerted,
            evicted,
        }
    }

    /// Last-known event for a stream. Unknown keys yield `None`, not an error.
    pub fn last_known(&self, key: &StreamKey) -> Option<&IntegrityEvent> {
        self.streams.get(key).map(|s| &s.last_event)
    }

    /// Metadata for every known stream, sorted by key.
    pub fn stream_meta(&self) -> Vec<StreamMeta> {
        self.streams
            .iter()
            .map(|(key, state)| StreamMeta {
                key: key.clone(),
                label: state.label.clone(),
                category: state.category.clone(),
                last_status: state.last_event.status.clone(),
                last_ok: state.last_event.is_ok,
                last_timestamp: state.last_event.timestamp,
            })
            .collect()
    }

    /// Filtered view of the event logs, ascending by timestamp (stable for
    /// equal timestamps), truncated to the newest `limit` entries.
    pub fn events(&self, filter: &EventFilter, limit: Option<usize>) -> Vec<IntegrityEvent> {
        let mut out: Vec<IntegrityEvent> = Vec::new();
        for (key, state) in &self.streams {
            if let Some(stream) = &filter.stream {
                if stream != key {
                    continue;
                }
            }
            if let Some(category) = &filter.category {
                if &state.category != category {
                    continue;
                }
            }
            for event in state.log.iter() {
                if let Some(status) = &filter.status {
                    if &event.status != status {
                        continue;
                    }
                }
                if let Some(since) = filter.since {
                    if event.timestamp < since {
                        continue;
                    }
                }
                if let Some(until) = filter.until {
                    if event.timestamp > until {
                        continue;
                    }
                }
                out.push(event.clone());
            }
        }
        out.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        if let Some(limit) = limit {
            let skip = out.len().saturating_sub(limit);
            out.drain(..skip);
        }
        out
    }

    /// Every retained event across all streams, ascending by timestamp.
    pub fn all_events(&self) -> Vec<IntegrityEvent> {
        self.events(&EventFilter::default(), None)
    }

    /// The most recent `limit` alerts, oldest first.
    pub fn alerts(&self, limit: usize) -> Vec<IntegrityEvent> {
        self.alerts.recent(limit)
    }

    /// All retained alerts, oldest first.
    pub fn all_alerts(&self) -> Vec<IntegrityEvent> {
        self.alerts.to_vec()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }
}

/// One bucket paired with the integrity status of every stream as of that
/// bucket's close. Derived on demand, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketSnapshot {
    pub bucket: Bucket,
    /// Latest event per stream with `timestamp <= bucket.end_ts`.
    pub statuses: BTreeMap<StreamKey, IntegrityEvent>,
}

/// Align integrity events onto a bucket sequence.
///
/// Buckets must be ascending by time (the timeline guarantees this). Events
/// may arrive in any order; they are stably sorted by timestamp first, so
/// equal timestamps keep arrival order and the last write per key wins.
///
/// A single cursor advances through the sorted events as the buckets advance:
/// for each bucket, every not-yet-admitted event with
/// `timestamp <= bucket.end_ts` is folded into a running per-stream map, and
/// the bucket's snapshot is a copy of that map. Because the cursor never
/// rewinds, each event is examined once and each bucket consumed once —
/// O(events + buckets) total, which is what keeps a minutes-cadence check
/// series mergeable against a seconds-cadence timeline over long windows.
///
/// Events older than the first bucket's start are still admitted at the first
/// bucket whose `end_ts` covers them; events newer than every bucket's end
/// stay pending and appear in no snapshot.
pub fn compute_bucket_snapshots(
    buckets: &[Bucket],
    events: &[IntegrityEvent],
) -> Vec<BucketSnapshot> {
    let mut sorted: Vec<&IntegrityEvent> = events.iter().collect();
    sorted.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

    let mut snapshots = Vec::with_capacity(buckets.len());
    let mut running: BTreeMap<StreamKey, IntegrityEvent> = BTreeMap::new();
    let mut cursor = 0;

    for bucket in buckets {
        while cursor < sorted.len() && sorted[cursor].timestamp <= bucket.end_ts {
            let event = sorted[cursor];
            running.insert(event.stream_key.clone(), event.clone());
            cursor += 1;
        }
        snapshots.push(BucketSnapshot {
            bucket: bucket.clone(),
            statuses: running.clone(),
        });
    }

    snapshots
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::ids::EventId;

    fn make_event(key: &str, ts: f64, status: &str) -> IntegrityEvent {
        IntegrityEvent {
            event_id: EventId::new(),
            stream_key: StreamKey::new(key),
            label: key.to_string(),
            category: "trade/test".to_string(),
            timestamp: ts,
            timestamp_iso: isoformat(ts),
            status: status.to_string(),
            is_ok: status == "ok",
            detail: None,
            check_type: "trade".to_string(),
            exchange: Some("test".to_string()),
            symbol: None,
            stage: None,
            results: Vec::new(),
            batch_size: 0,
            batch_failures: 0,
            source: None,
        }
    }

    fn make_bucket(start: f64, end: f64) -> Bucket {
        Bucket {
            start_ts: start,
            end_ts: end,
            max_bps: 1e6,
            avg_bps: 2.5e5,
            sample_count: 500,
        }
    }

    fn correlator() -> IntegrityCorrelator {
        IntegrityCorrelator::new(RetentionConfig::default())
    }

    #[test]
    fn test_record_creates_stream_once() {
        let mut corr = correlator();
        let first = corr.record(make_event("s1", 100.0, "ok"));
        assert!(first.new_stream);
        let second = corr.record(make_event("s1", 160.0, "ok"));
        assert!(!second.new_stream);
        assert_eq!(corr.stream_count(), 1);
    }

    #[test]
    fn test_last_known_follows_newest_timestamp() {
        let mut corr = correlator();
        corr.record(make_event("s1", 100.0, "ok"));
        corr.record(make_event("s1", 200.0, "missing"));
        assert_eq!(
            corr.last_known(&StreamKey::new("s1")).unwrap().status,
            "missing"
        );

        // An older event must not revert the last-known entry.
        corr.record(make_event("s1", 150.0, "ok"));
        assert_eq!(
            corr.last_known(&StreamKey::new("s1")).unwrap().status,
            "missing"
        );
    }

    #[test]
    fn test_equal_timestamp_tie_breaks_by_arrival() {
        let mut corr = correlator();
        corr.record(make_event("s1", 100.0, "ok"));
        corr.record(make_event("s1", 100.0, "gap"));
        assert_eq!(corr.last_known(&StreamKey::new("s1")).unwrap().status, "gap");
    }

    #[test]
    fn test_not_ok_lands_in_alert_feed() {
        let mut corr = correlator();
        let outcome = corr.record(make_event("s1", 100.0, "missing"));
        assert!(outcome.alerted);
        corr.record(make_event("s1", 160.0, "ok"));
        assert_eq!(corr.alerts(10).len(), 1);
        assert_eq!(corr.alerts(10)[0].status, "missing");
    }

    #[test]
    fn test_log_eviction_preserves_last_known() {
        let config = RetentionConfig {
            max_events_per_stream: 2,
            ..RetentionConfig::default()
        };
        let mut corr = IntegrityCorrelator::new(config);
        corr.record(make_event("s1", 100.0, "stale"));
        corr.record(make_event("s1", 50.0, "ok"));
        corr.record(make_event("s1", 60.0, "ok"));
        // The 100.0 event has been evicted from the log, but it is still the
        // newest by timestamp and remains the stream's current status.
        let events = corr.events(
            &EventFilter {
                stream: Some(StreamKey::new("s1")),
                ..EventFilter::default()
            },
            None,
        );
        assert_eq!(events.len(), 2);
        assert_eq!(
            corr.last_known(&StreamKey::new("s1")).unwrap().timestamp,
            100.0
        );
    }

    #[test]
    fn test_per_category_log_cap() {
        let mut config = RetentionConfig::default();
        config.category_event_caps.insert("trade/test".to_string(), 3);
        let mut corr = IntegrityCorrelator::new(config);
        for i in 0..10 {
            corr.record(make_event("s1", 100.0 + i as f64, "ok"));
        }
        assert_eq!(corr.all_events().len(), 3);
    }

    #[test]
    fn test_events_filtering_and_limit() {
        let mut corr = correlator();
        corr.record(make_event("s1", 100.0, "ok"));
        corr.record(make_event("s1", 200.0, "gap"));
        corr.record(make_event("s2", 300.0, "ok"));

        let gaps = corr.events(
            &EventFilter {
                status: Some("gap".to_string()),
                ..EventFilter::default()
            },
            None,
        );
        assert_eq!(gaps.len(), 1);

        let windowed = corr.events(
            &EventFilter {
                since: Some(150.0),
                until: Some(250.0),
                ..EventFilter::default()
            },
            None,
        );
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].timestamp, 200.0);

        let limited = corr.events(&EventFilter::default(), Some(2));
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].timestamp, 200.0);
        assert_eq!(limited[1].timestamp, 300.0);
    }

    #[test]
    fn test_unknown_stream_queries_are_empty() {
        let corr = correlator();
        assert!(corr.last_known(&StreamKey::new("never-seen")).is_none());
        let events = corr.events(
            &EventFilter {
                stream: Some(StreamKey::new("never-seen")),
                ..EventFilter::default()
            },
            None,
        );
        assert!(events.is_empty());
    }

    #[test]
    fn test_snapshots_admit_event_at_covering_bucket() {
        let buckets = vec![
            make_bucket(100.0, 105.0),
            make_bucket(105.0, 110.0),
            make_bucket(110.0, 115.0),
        ];
        let events = vec![make_event("s1", 107.0, "ok")];

        let snaps = compute_bucket_snapshots(&buckets, &events);
        assert_eq!(snaps.len(), 3);
        assert!(snaps[0].statuses.is_empty());
        assert_eq!(snaps[1].statuses.len(), 1);
        assert_eq!(snaps[2].statuses.len(), 1);
    }

    #[test]
    fn test_snapshots_admit_pre_first_bucket_event() {
        let buckets = vec![make_bucket(100.0, 105.0), make_bucket(105.0, 110.0)];
        let events = vec![make_event("s1", 42.0, "ok")];

        let snaps = compute_bucket_snapshots(&buckets, &events);
        // Too-early events are admitted at the first bucket, never dropped.
        assert_eq!(snaps[0].statuses.len(), 1);
    }

    #[test]
    fn test_snapshots_hold_future_events_pending() {
        let buckets = vec![make_bucket(100.0, 105.0)];
        let events = vec![make_event("s1", 999.0, "ok")];

        let snaps = compute_bucket_snapshots(&buckets, &events);
        assert!(snaps[0].statuses.is_empty());
    }

    #[test]
    fn test_not_ok_persists_until_superseded() {
        let buckets: Vec<Bucket> = (0..5)
            .map(|i| make_bucket(100.0 + i as f64 * 5.0, 105.0 + i as f64 * 5.0))
            .collect();
        let events = vec![
            make_event("s1", 101.0, "ok"),
            make_event("s1", 108.0, "missing"),
            make_event("s1", 121.0, "ok"),
        ];

        let snaps = compute_bucket_snapshots(&buckets, &events);
        let statuses: Vec<&str> = snaps
            .iter()
            .map(|s| s.statuses[&StreamKey::new("s1")].status.as_str())
            .collect();
        // not-ok appears unchanged in every snapshot until a newer event
        // supersedes it.
        assert_eq!(statuses, vec!["ok", "missing", "missing", "missing", "ok"]);
    }

    #[test]
    fn test_snapshot_last_write_per_key_wins() {
        let buckets = vec![make_bucket(100.0, 105.0)];
        let events = vec![
            make_event("s1", 101.0, "ok"),
            make_event("s1", 103.0, "gap"),
            make_event("s2", 102.0, "ok"),
        ];

        let snaps = compute_bucket_snapshots(&buckets, &events);
        assert_eq!(snaps[0].statuses.len(), 2);
        assert_eq!(snaps[0].statuses[&StreamKey::new("s1")].status, "gap");
    }

    #[test]
    fn test_empty_inputs() {
        assert!(compute_bucket_snapshots(&[], &[]).is_empty());
        let buckets = vec![make_bucket(100.0, 105.0)];
        let snaps = compute_bucket_snapshots(&buckets, &[]);
        assert_eq!(snaps.len(), 1);
        assert!(snaps[0].statuses.is_empty());
    }
}
