//! Canonical inbound message types
//!
//! Defines the normalized forms of the two producer message families the
//! monitor consumes: continuous bandwidth samples from the link probe, and
//! periodic integrity-check results from the exchange-facing probes.
//!
//! Producers speak a loose JSON dialect; everything here is the output of the
//! single normalization pass in `ingest` and is fully typed. No other part of
//! the engine touches raw JSON.

use serde::{Deserialize, Serialize};
use types::ids::EventId;
use types::time::UnixSeconds;

/// Status string a check reports when healthy. Anything else is not-ok.
pub const STATUS_OK: &str = "ok";

/// A normalized bandwidth sample covering one probe window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandwidthSample {
    /// Host the probe runs on.
    pub hostname: String,
    /// Interface the probe watches.
    pub interface: String,
    /// Window start, Unix seconds.
    pub window_start_ts: UnixSeconds,
    /// Window end, Unix seconds (exclusive).
    pub window_end_ts: UnixSeconds,
    /// Peak bits-per-second observed in the window. Raw probe value,
    /// no unit conversion (presentation concern).
    pub max_bps: f64,
    /// Mean bits-per-second over the window.
    pub avg_bps: f64,
    /// Number of probe ticks aggregated into this window.
    pub sample_count: u32,
    /// Producer stream that delivered this sample, for diagnostics.
    pub source: Option<String>,
}

impl BandwidthSample {
    /// Window duration in seconds.
    pub fn window_secs(&self) -> f64 {
        self.window_end_ts - self.window_start_ts
    }
}

/// One sub-result of a batched check (e.g. per-symbol results of a
/// trade-batch check). Normalized alongside its parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubResult {
    pub symbol: Option<String>,
    /// Lowercased status string.
    pub status: String,
    pub is_ok: bool,
    pub detail: Option<String>,
    /// Falls back to the parent check's timestamp when absent.
    pub timestamp: UnixSeconds,
}

/// A normalized integrity-check result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityCheck {
    /// Assigned once, at the normalization boundary.
    pub event_id: EventId,
    /// Check family: `trade`, `inc_seq`, `rest_summary`, ...
    pub check_type: String,
    pub exchange: Option<String>,
    pub symbol: Option<String>,
    pub stage: Option<String>,
    pub hostname: Option<String>,
    pub interface: Option<String>,
    /// Pre-derived stream key supplied by the producer, reused verbatim
    /// by the identity resolver when present.
    pub explicit_key: Option<String>,
    /// Lowercased status string.
    pub status: String,
    pub is_ok: bool,
    pub detail: Option<String>,
    /// Check timestamp, Unix seconds. Always producer-supplied; the engine
    /// never stamps ingest time onto producer data.
    pub timestamp: UnixSeconds,
    /// Nested per-symbol results for batch checks. Empty otherwise.
    pub results: Vec<SubResult>,
    pub batch_size: u32,
    pub batch_failures: u32,
    pub source: Option<String>,
}

/// A normalized producer message, dispatched by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MonitorMessage {
    Bandwidth(BandwidthSample),
    Integrity(IntegrityCheck),
}

impl MonitorMessage {
    /// Message kind as a string label for logging.
    pub fn kind_label(&self) -> &'static str {
        match self {
            MonitorMessage::Bandwidth(_) => "bandwidth",
            MonitorMessage::Integrity(_) => "integrity",
        }
    }
}
