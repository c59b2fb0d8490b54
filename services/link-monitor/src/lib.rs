//! Link Monitor Service
//!
//! Correlates two telemetry families about the same market-data links:
//! - Continuous bandwidth samples from a kernel link probe (seconds cadence)
//! - Per-symbol/per-exchange integrity check results (minutes cadence)
//!
//! and distributes the time-aligned view to live subscribers as one snapshot
//! followed by ordered deltas, under strict memory bounds.
//!
//! # Architecture
//!
//! ```text
//!  Producer JSON (bandwidth / integrity)
//!        │
//!    ┌───▼────┐
//!    │ Ingest │  ← One normalization pass; malformed input skipped
//!    └───┬────┘
//!        │
//!   ┌────┴───────────┐
//!   │                │
//! ┌─▼────────┐  ┌────▼──────┐
//! │ Timeline │  │ Identity  │
//! │ (bucket) │  │ Resolver  │
//! └─┬────────┘  └────┬──────┘
//!   │           ┌────▼──────┐
//!   │           │Correlator │  ← last-known table + bounded logs
//!   │           └────┬──────┘
//!   └────┬───────────┘
//!   ┌────▼────────────────┐
//!   │ Engine (seq + lock) │  ← one delta per mutation
//!   └────┬────────────────┘
//!   ┌────▼────────────────┐
//!   │ Hub → WS broadcast  │  ← snapshot-then-deltas, bounded queues
//!   └─────────────────────┘
//! ```

pub mod correlator;
pub mod delta;
pub mod engine;
pub mod hub;
pub mod identity;
pub mod ingest;
pub mod messages;
pub mod metrics;
pub mod retention;
pub mod server;
pub mod snapshot;
pub mod subscribers;
pub mod timeline;

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
