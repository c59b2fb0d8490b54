//! Error taxonomy for the link monitor
//!
//! Ingestion errors are diagnostics: the ingest path is total and reports
//! them via counters/logs without ever propagating a fault to the producer.
//! Query errors are the only client-visible failures, and only for
//! structurally invalid requests; unknown keys yield empty results instead.

use thiserror::Error;

/// Top-level monitor error
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MonitorError {
    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("System error: {message}")]
    System { message: String },
}

/// Ingestion-path diagnostics
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IngestError {
    #[error("Malformed message: {reason}")]
    Malformed { reason: String },

    #[error(
        "Out-of-order sample for {node}: window_end {window_end} not after newest bucket start {newest_start}"
    )]
    OutOfOrderSample {
        node: String,
        window_end: f64,
        newest_start: f64,
    },

    #[error("Unknown message kind: {kind}")]
    UnknownKind { kind: String },
}

/// Client-visible query validation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("Invalid node key: {value}")]
    InvalidNodeKey { value: String },

    #[error("Invalid limit: {value} (must be >= 1)")]
    InvalidLimit { value: i64 },

    #[error("Invalid time range: since {since} is not before until {until}")]
    InvalidTimeRange { since: f64, until: f64 },

    #[error("Invalid threshold: {value}")]
    InvalidThreshold { value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingest_error_display() {
        let err = IngestError::Malformed {
            reason: "missing hostname".to_string(),
        };
        assert_eq!(err.to_string(), "Malformed message: missing hostname");
    }

    #[test]
    fn test_out_of_order_display_carries_window() {
        let err = IngestError::OutOfOrderSample {
            node: "host|eth0".to_string(),
            window_end: 100.0,
            newest_start: 150.0,
        };
        let msg = err.to_string();
        assert!(msg.contains("host|eth0"));
        assert!(msg.contains("100"));
        assert!(msg.contains("150"));
    }

    #[test]
    fn test_query_error_wraps_into_monitor_error() {
        let err: MonitorError = QueryError::InvalidLimit { value: 0 }.into();
        assert!(matches!(err, MonitorError::Query(_)));
    }
}
