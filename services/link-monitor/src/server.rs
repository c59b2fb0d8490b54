//! HTTP/WebSocket surface
//!
//! REST queries over the engine state, the `/ingest` producer boundary, and
//! the `/ws/stream` subscription socket (snapshot, then ordered deltas).
//!
//! Consumer-facing queries fail closed: unknown keys yield empty results
//! with 200, while structurally invalid parameters (bad node key syntax,
//! zero limit, inverted time range) get a 400 with a JSON error body.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use types::errors::QueryError;
use types::ids::NodeKey;

use crate::correlator::EventFilter;
use crate::engine::{MonitorEngine, StatusReport};
use crate::hub::WsFrame;
use crate::subscribers::SubscriberId;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Bandwidth alert threshold surfaced to consumers, bits per second.
    pub alert_threshold_bps: u64,
    /// Suggested polling cadence surfaced to consumers, milliseconds.
    pub refresh_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8600".to_string(),
            alert_threshold_bps: 0,
            refresh_interval_ms: 5000,
        }
    }
}

impl ServerConfig {
    /// Build from environment variables, falling back to defaults.
    ///
    /// `LINK_MONITOR_ADDR` sets the bind address;
    /// `LINK_MONITOR_ALERT_THRESHOLD` accepts suffixed values like `2.5G`.
    pub fn from_env() -> Result<Self, QueryError> {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("LINK_MONITOR_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(raw) = std::env::var("LINK_MONITOR_ALERT_THRESHOLD") {
            config.alert_threshold_bps = parse_threshold(&raw)?;
        }
        Ok(config)
    }
}

/// Parse a bandwidth threshold with optional K/M/G/T suffix
/// (`"500M"` → 500_000_000). Empty input means "no threshold".
pub fn parse_threshold(value: &str) -> Result<u64, QueryError> {
    let text = value.trim();
    if text.is_empty() {
        return Ok(0);
    }
    let invalid = || QueryError::InvalidThreshold {
        value: value.to_string(),
    };

    let (number_part, multiplier) = match text
        .chars()
        .last()
        .map(|c| c.to_ascii_uppercase())
    {
        Some('K') => (&text[..text.len() - 1], 1_000_f64),
        Some('M') => (&text[..text.len() - 1], 1_000_000_f64),
        Some('G') => (&text[..text.len() - 1], 1_000_000_000_f64),
        Some('T') => (&text[..text.len() - 1], 1_000_000_000_000_f64),
        _ => (text, 1.0),
    };
    let base: f64 = number_part.trim().parse().map_err(|_| invalid())?;
    if !base.is_finite() || base < 0.0 {
        return Err(invalid());
    }
    Ok((base * multiplier) as u64)
}

/// Current wall-clock time as Unix seconds.
fn now_unix() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<MonitorEngine>,
    pub config: Arc<ServerConfig>,
}

/// Client-visible validation failure: 400 with a JSON body.
struct ApiError(QueryError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (StatusCode::BAD_REQUEST, body).into_response()
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        Self(err)
    }
}

/// Build the service router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ingest", post(ingest))
        .route("/api/status", get(get_status))
        .route("/api/buckets", get(get_buckets))
        .route("/api/integrity", get(get_integrity))
        .route("/api/alerts", get(get_alerts))
        .route("/api/correlated", get(get_correlated))
        .route("/metrics", get(get_metrics))
        .route("/ws/stream", get(ws_stream))
        .with_state(state)
}

// parameter parsing ------------------------------------------------------

fn parse_node(raw: &str) -> Result<NodeKey, QueryError> {
    NodeKey::parse(raw).ok_or_else(|| QueryError::InvalidNodeKey {
        value: raw.to_string(),
    })
}

fn parse_limit(raw: Option<i64>) -> Result<Option<usize>, QueryError> {
    match raw {
        None => Ok(None),
        Some(v) if v >= 1 => Ok(Some(v as usize)),
        Some(v) => Err(QueryError::InvalidLimit { value: v }),
    }
}

fn validate_range(since: Option<f64>, until: Option<f64>) -> Result<(), QueryError> {
    if let (Some(since), Some(until)) = (since, until) {
        if since >= until {
            return Err(QueryError::InvalidTimeRange { since, until });
        }
    }
    Ok(())
}

// handlers ---------------------------------------------------------------

async fn ingest(
    State(state): State<AppState>,
    Json(payload): Json<serde_json::Value>,
) -> Json<crate::engine::IngestReport> {
    Json(state.engine.ingest_json(&payload))
}

#[derive(Serialize)]
struct StatusResponse {
    #[serde(flatten)]
    report: StatusReport,
    alert_threshold_bps: u64,
    refresh_interval_ms: u64,
}

async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        report: state.engine.status(),
        alert_threshold_bps: state.config.alert_threshold_bps,
        refresh_interval_ms: state.config.refresh_interval_ms,
    })
}

#[derive(Debug, Deserialize)]
struct BucketParams {
    node: Option<String>,
    limit: Option<i64>,
    since: Option<f64>,
    until: Option<f64>,
}

async fn get_buckets(
    State(state): State<AppState>,
    Query(params): Query<BucketParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let node = params.node.as_deref().map(parse_node).transpose()?;
    let limit = parse_limit(params.limit)?;
    validate_range(params.since, params.until)?;

    let data = state
        .engine
        .buckets(node.as_ref(), limit, params.since, params.until);
    Ok(Json(serde_json::json!({ "data": data })))
}

#[derive(Debug, Deserialize)]
struct IntegrityParams {
    stream: Option<String>,
    category: Option<String>,
    status: Option<String>,
    limit: Option<i64>,
    since: Option<f64>,
    until: Option<f64>,
    #[serde(default)]
    meta: bool,
}

async fn get_integrity(
    State(state): State<AppState>,
    Query(params): Query<IntegrityParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = parse_limit(params.limit)?;
    validate_range(params.since, params.until)?;

    let filter = EventFilter {
        stream: params.stream.map(|s| s.as_str().into()),
        category: params.category,
        status: params.status,
        since: params.since,
        until: params.until,
    };
    let data = state.engine.integrity(&filter, limit);

    let mut body = serde_json::json!({ "data": data });
    if params.meta {
        body["meta"] = serde_json::json!({ "keys": state.engine.stream_meta() });
    }
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
struct AlertParams {
    limit: Option<i64>,
}

async fn get_alerts(
    State(state): State<AppState>,
    Query(params): Query<AlertParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = parse_limit(params.limit)?.unwrap_or(180);
    Ok(Json(
        serde_json::json!({ "alerts": state.engine.alerts(limit) }),
    ))
}

#[derive(Debug, Deserialize)]
struct CorrelatedParams {
    node: String,
    limit: Option<i64>,
}

async fn get_correlated(
    State(state): State<AppState>,
    Query(params): Query<CorrelatedParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let node = parse_node(&params.node)?;
    let limit = parse_limit(params.limit)?.unwrap_or(60);
    Ok(Json(
        serde_json::json!({ "data": state.engine.correlated(&node, limit) }),
    ))
}

async fn get_metrics(State(state): State<AppState>) -> Json<BTreeMap<String, u64>> {
    Json(state.engine.metrics().export())
}

// websocket --------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WsParams {
    node: Option<String>,
}

async fn ws_stream(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
) -> Result<Response, ApiError> {
    let filter = params.node.as_deref().map(parse_node).transpose()?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state.engine, filter)))
}

/// Drive one subscriber socket: snapshot first, then drained delta frames as
/// the engine signals them. The socket task holds no engine lock while
/// awaiting the network, so a slow peer only ever backs up its own queue.
async fn handle_socket(socket: WebSocket, engine: Arc<MonitorEngine>, filter: Option<NodeKey>) {
    let (mut sender, mut receiver) = socket.split();

    let subscription = engine.subscribe(filter, now_unix());
    let id = subscription.id;
    info!(subscriber = id, "Subscriber attached");

    let snapshot_frame = match serde_json::to_string(&WsFrame::Snapshot {
        payload: &subscription.snapshot,
    }) {
        Ok(json) => json,
        Err(_) => {
            engine.unsubscribe(id);
            return;
        }
    };
    if sender.send(Message::Text(snapshot_frame)).await.is_err() {
        engine.unsubscribe(id);
        return;
    }

    loop {
        tokio::select! {
            _ = subscription.notify.notified() => {
                if !deliver_pending(&mut sender, &engine, id).await {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Inbound text/ping frames are ignored; this is a
                    // push-only channel.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    engine.unsubscribe(id);
    info!(subscriber = id, "Subscriber detached");
}

/// Flush everything the hub has queued for this subscriber. Returns false
/// when the socket should close.
async fn deliver_pending(
    sender: &mut SplitSink<WebSocket, Message>,
    engine: &Arc<MonitorEngine>,
    id: SubscriberId,
) -> bool {
    let outcome = engine.drain(id);

    if outcome.disconnect {
        debug!(subscriber = id, "Closing lagging subscriber");
        let _ = sender.send(Message::Close(None)).await;
        return false;
    }

    if outcome.resnapshot {
        // Backlog was dropped; re-establish state with a fresh cut.
        let snapshot = engine.resnapshot(id, now_unix());
        let frame = match serde_json::to_string(&WsFrame::Snapshot { payload: &snapshot }) {
            Ok(json) => json,
            Err(_) => return false,
        };
        return sender.send(Message::Text(frame)).await.is_ok();
    }

    for frame in outcome.frames {
        if sender.send(Message::Text(frame.payload)).await.is_err() {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_threshold_suffixes() {
        assert_eq!(parse_threshold("500").unwrap(), 500);
        assert_eq!(parse_threshold("2K").unwrap(), 2_000);
        assert_eq!(parse_threshold("1.5M").unwrap(), 1_500_000);
        assert_eq!(parse_threshold("2.5G").unwrap(), 2_500_000_000);
        assert_eq!(parse_threshold("1T").unwrap(), 1_000_000_000_000);
        assert_eq!(parse_threshold(" 3 m ").unwrap(), 3_000_000);
        assert_eq!(parse_threshold("").unwrap(), 0);
    }

    #[test]
    fn test_parse_threshold_rejects_garbage() {
        assert!(parse_threshold("abc").is_err());
        assert!(parse_threshold("-5M").is_err());
        assert!(parse_threshold("1.2.3G").is_err());
    }

    #[test]
    fn test_parse_limit_bounds() {
        assert_eq!(parse_limit(None).unwrap(), None);
        assert_eq!(parse_limit(Some(10)).unwrap(), Some(10));
        assert!(parse_limit(Some(0)).is_err());
        assert!(parse_limit(Some(-1)).is_err());
    }

    #[test]
    fn test_validate_range() {
        assert!(validate_range(None, None).is_ok());
        assert!(validate_range(Some(1.0), Some(2.0)).is_ok());
        assert!(validate_range(Some(2.0), Some(1.0)).is_err());
        assert!(validate_range(Some(2.0), Some(2.0)).is_err());
    }

    #[test]
    fn test_parse_node_syntax() {
        assert!(parse_node("host|eth0").is_ok());
        assert!(parse_node("garbage").is_err());
    }
}
