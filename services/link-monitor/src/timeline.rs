//! Per-node bucket timeline
//!
//! Maintains the ordered, bounded sequence of fixed-width bandwidth buckets
//! for one monitored node. The sequence is strictly ordered by `start_ts` and
//! non-overlapping: new windows append at the tail, the head is evicted at
//! capacity, and only the newest bucket may be updated in place (idempotent
//! redelivery of the same window). Samples whose window closed at or before
//! the newest bucket's start are rejected as out-of-order — a recoverable
//! condition, logged and dropped with no state change.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use types::errors::IngestError;
use types::ids::NodeKey;
use types::time::UnixSeconds;

use crate::messages::BandwidthSample;
use crate::retention::{BoundedLog, RetentionConfig};

/// One fixed-width window of aggregated bandwidth statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    /// Window start, Unix seconds (inclusive).
    pub start_ts: UnixSeconds,
    /// Window end, Unix seconds (exclusive).
    pub end_ts: UnixSeconds,
    /// Peak bits-per-second in the window, stored raw.
    pub max_bps: f64,
    /// Mean bits-per-second in the window, stored raw.
    pub avg_bps: f64,
    /// Probe ticks aggregated into this window.
    pub sample_count: u32,
}

impl Bucket {
    fn from_sample(sample: &BandwidthSample) -> Self {
        Self {
            start_ts: sample.window_start_ts,
            end_ts: sample.window_end_ts,
            max_bps: sample.max_bps,
            avg_bps: sample.avg_bps,
            sample_count: sample.sample_count,
        }
    }

    /// Window duration in seconds.
    pub fn window_secs(&self) -> f64 {
        self.end_ts - self.start_ts
    }
}

/// Result of applying one sample to the timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new bucket was appended; `evicted` head buckets were removed.
    Appended { evicted: usize },
    /// The sample matched the newest bucket's window and refreshed it.
    UpdatedNewest,
}

/// Ordered, bounded bucket sequence for one node.
#[derive(Debug, Clone)]
pub struct BucketTimeline {
    node: NodeKey,
    buckets: BoundedLog<Bucket>,
    tolerance: f64,
}

impl BucketTimeline {
    pub fn new(node: NodeKey, config: &RetentionConfig) -> Self {
        Self {
            node,
            buckets: BoundedLog::new(config.max_buckets_per_node),
            tolerance: config.window_match_tolerance_secs,
        }
    }

    /// Apply one bandwidth sample.
    ///
    /// Redelivery of the newest window (boundaries matching within the
    /// configured tolerance) updates that bucket in place. A window that
    /// closed at or before the newest bucket's start is rejected. Anything
    /// else appends, evicting from the head on overflow.
    pub fn upsert_sample(
        &mut self,
        sample: &BandwidthSample,
    ) -> Result<UpsertOutcome, IngestError> {
        if let Some((newest_start, newest_end)) =
            self.buckets.back().map(|b| (b.start_ts, b.end_ts))
        {
            let matches_newest = (sample.window_start_ts - newest_start).abs()
                <= self.tolerance
                && (sample.window_end_ts - newest_end).abs() <= self.tolerance;

            if matches_newest {
                if let Some(bucket) = self.buckets.back_mut() {
                    bucket.max_bps = sample.max_bps;
                    bucket.avg_bps = sample.avg_bps;
                    bucket.sample_count = sample.sample_count;
                }
                debug!(
                    node = %self.node,
                    start_ts = sample.window_start_ts,
                    "Refreshed newest bucket in place"
                );
                return Ok(UpsertOutcome::UpdatedNewest);
            }

            if sample.window_end_ts <= newest_start + self.tolerance {
                warn!(
                    node = %self.node,
                    window_end = sample.window_end_ts,
                    newest_start,
                    "Rejecting out-of-order bandwidth sample"
                );
                return Err(IngestError::OutOfOrderSample {
                    node: self.node.to_string(),
                    window_end: sample.window_end_ts,
                    newest_start,
                });
            }
        }

        let evicted = self.buckets.push(Bucket::from_sample(sample));
        Ok(UpsertOutcome::Appended { evicted })
    }

    /// The most recent `limit` buckets (or all, if fewer), ascending by time.
    pub fn get_recent(&self, limit: usize) -> Vec<Bucket> {
        self.buckets.recent(limit)
    }

    /// Buckets whose window intersects `[since, until]`, ascending by time.
    pub fn in_range(&self, since: Option<f64>, until: Option<f64>) -> Vec<Bucket> {
        self.buckets
            .iter()
            .filter(|b| since.map_or(true, |s| b.end_ts > s))
            .filter(|b| until.map_or(true, |u| b.start_ts < u))
            .cloned()
            .collect()
    }

    /// The newest bucket, if any.
    pub fn newest(&self) -> Option<&Bucket> {
        self.buckets.back()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn node(&self) -> &NodeKey {
        &self.node
    }
}
