//! Ingestion boundary: one normalization pass over raw producer JSON
//!
//! Producers emit a loose dialect (millisecond vs second timestamps, a couple
//! of historical field-name aliases for the bandwidth stats). This module is
//! the only place that dialect is understood: each documented alias is
//! normalized here, and anything outside the closed set is rejected as
//! malformed rather than guessed at.
//!
//! Ingestion is total. A malformed message produces an `IngestError`
//! diagnostic for the caller to count and log — never a fault on the ingest
//! path.

use serde::Serialize;
use serde_json::Value;
use tracing::info;
use types::errors::IngestError;
use types::ids::EventId;
use types::time::{coerce_timestamp, UnixSeconds};

use crate::messages::{BandwidthSample, IntegrityCheck, MonitorMessage, SubResult, STATUS_OK};

/// Accepted aliases for the mean-bandwidth field, canonical name first.
const AVG_BPS_FIELDS: &[&str] = &["avg_bps", "bps_avg"];
/// Accepted aliases for the peak-bandwidth field, canonical name first.
const MAX_BPS_FIELDS: &[&str] = &["max_bps", "bps_max"];
/// Accepted aliases for the tick-count field, canonical name first.
const SAMPLE_COUNT_FIELDS: &[&str] = &["sample_count", "samples"];

/// Running totals for the ingest path, exposed via `/api/status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub samples_accepted: u64,
    pub checks_accepted: u64,
    pub malformed_dropped: u64,
    pub out_of_order_dropped: u64,
    pub buckets_evicted: u64,
    pub events_evicted: u64,
}

/// Parse a producer envelope `{kind, payload, source?}` into a normalized
/// message.
pub fn parse_envelope(raw: &Value) -> Result<MonitorMessage, IngestError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| malformed("envelope is not an object"))?;
    let kind = obj
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("missing kind"))?;
    let payload = obj
        .get("payload")
        .ok_or_else(|| malformed("missing payload"))?;
    let source = obj.get("source").and_then(Value::as_str);

    match kind {
        "bandwidth" => Ok(MonitorMessage::Bandwidth(normalize_bandwidth(
            payload, source,
        )?)),
        "integrity" => Ok(MonitorMessage::Integrity(normalize_integrity(
            payload, source,
        )?)),
        other => Err(IngestError::UnknownKind {
            kind: other.to_string(),
        }),
    }
}

/// Normalize a raw bandwidth payload.
///
/// Required: non-empty `hostname` and `interface`, and a window whose end is
/// after its start. The payload must carry at least one bandwidth field from
/// the documented set; `avg_bps` missing or zero is backfilled from
/// `bytes_total` over the window duration when possible.
pub fn normalize_bandwidth(
    raw: &Value,
    source: Option<&str>,
) -> Result<BandwidthSample, IngestError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| malformed("bandwidth payload is not an object"))?;

    let hostname = require_str(obj, "hostname")?;
    let interface = require_str(obj, "interface")?;

    let window_start_ts = field_f64(obj, "window_start_ts")
        .and_then(coerce_timestamp)
        .ok_or_else(|| malformed("missing or invalid window_start_ts"))?;
    let window_end_ts = field_f64(obj, "window_end_ts")
        .and_then(coerce_timestamp)
        .ok_or_else(|| malformed("missing or invalid window_end_ts"))?;
    if window_end_ts <= window_start_ts {
        return Err(malformed("window_end_ts is not after window_start_ts"));
    }

    let max_bps = first_field_f64(obj, MAX_BPS_FIELDS);
    let avg_bps = first_field_f64(obj, AVG_BPS_FIELDS);
    let bytes_total = field_f64(obj, "bytes_total");

    if max_bps.is_none() && avg_bps.is_none() && bytes_total.is_none() {
        return Err(malformed("no bandwidth fields present"));
    }

    let avg_bps = match avg_bps {
        Some(v) if v > 0.0 => v,
        _ => match bytes_total {
            // No direct average; derive it from the byte counter.
            Some(bytes) if bytes > 0.0 => {
                let derived = bytes * 8.0 / (window_end_ts - window_start_ts);
                info!(
                    hostname = %hostname,
                    interface = %interface,
                    avg_bps = derived,
                    "Derived avg_bps from bytes_total"
                );
                derived
            }
            _ => avg_bps.unwrap_or(0.0),
        },
    };

    let sample_count = first_field_f64(obj, SAMPLE_COUNT_FIELDS)
        .map(|v| v.max(0.0) as u32)
        .unwrap_or(0);

    Ok(BandwidthSample {
        hostname,
        interface,
        window_start_ts,
        window_end_ts,
        max_bps: max_bps.unwrap_or(0.0),
        avg_bps,
        sample_count,
        source: source.map(str::to_string),
    })
}

/// Normalize a raw integrity-check payload.
///
/// Required: non-empty `type` and `status`, and a timestamp from the
/// documented set (`timestamp_ms` preferred, then `timestamp`). The engine
/// never substitutes ingest time for a missing producer timestamp.
pub fn normalize_integrity(
    raw: &Value,
    source: Option<&str>,
) -> Result<IntegrityCheck, IngestError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| malformed("integrity payload is not an object"))?;

    let check_type = require_str(obj, "type")?;
    let status = require_str(obj, "status")?.to_lowercase();

    let timestamp = field_f64(obj, "timestamp_ms")
        .and_then(coerce_timestamp)
        .or_else(|| field_f64(obj, "timestamp").and_then(coerce_timestamp))
        .ok_or_else(|| malformed("missing or invalid timestamp"))?;

    let results = obj
        .get("results")
        .and_then(Value::as_array)
        .map(|items| normalize_sub_results(items, timestamp))
        .unwrap_or_default();

    let batch_size = field_f64(obj, "batch_size")
        .map(|v| v.max(0.0) as u32)
        .unwrap_or(results.len() as u32);
    let batch_failures = field_f64(obj, "batch_failures")
        .map(|v| v.max(0.0) as u32)
        .unwrap_or_else(|| results.iter().filter(|r| !r.is_ok).count() as u32);

    let is_ok = status == STATUS_OK;

    Ok(IntegrityCheck {
        event_id: EventId::new(),
        check_type,
        exchange: optional_str(obj, "exchange"),
        symbol: optional_str(obj, "symbol"),
        stage: optional_str(obj, "stage"),
        hostname: optional_str(obj, "hostname"),
        interface: optional_str(obj, "interface"),
        explicit_key: optional_str(obj, "key"),
        status,
        is_ok,
        detail: optional_str(obj, "detail"),
        timestamp,
        results,
        batch_size,
        batch_failures,
        source: source.map(str::to_string),
    })
}

fn normalize_sub_results(items: &[Value], parent_ts: UnixSeconds) -> Vec<SubResult> {
    items
        .iter()
        .filter_map(Value::as_object)
        .map(|item| {
            let status = item
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_lowercase();
            let timestamp = item
                .get("timestamp")
                .and_then(value_f64)
                .and_then(coerce_timestamp)
                .unwrap_or(parent_ts);
            SubResult {
                symbol: optional_str(item, "symbol"),
                is_ok: status == STATUS_OK,
                status,
                detail: optional_str(item, "detail"),
                timestamp,
            }
        })
        .collect()
}

fn malformed(reason: &str) -> IngestError {
    IngestError::Malformed {
        reason: reason.to_string(),
    }
}

fn require_str(
    obj: &serde_json::Map<String, Value>,
    field: &str,
) -> Result<String, IngestError> {
    obj.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| malformed(&format!("missing {field}")))
}

fn optional_str(obj: &serde_json::Map<String, Value>, field: &str) -> Option<String> {
    obj.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Numeric field: accepts JSON numbers and numeric strings.
fn field_f64(obj: &serde_json::Map<String, Value>, field: &str) -> Option<f64> {
    obj.get(field).and_then(value_f64)
}

fn value_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn first_field_f64(obj: &serde_json::Map<String, Value>, fields: &[&str]) -> Option<f64> {
    fields.iter().find_map(|f| field_f64(obj, f))
}
