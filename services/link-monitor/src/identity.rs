//! Identity resolution for check streams
//!
//! Derives a stable, canonical `{key, label, category}` for a check series
//! from whatever metadata the producer supplied. Resolution is a pure
//! function: the same inputs always produce the same output, independent of
//! call order, and nothing is cached onto the event itself. Callers hold the
//! raw message and the resolved identity side by side.
//!
//! Resolution never fails. A fully anonymous event resolves to a shared
//! sentinel identity rather than an error.

use serde::{Deserialize, Serialize};
use types::ids::{StreamKey, KEY_SEPARATOR};

use crate::messages::IntegrityCheck;

/// Key for events carrying no identity fields at all.
pub const ANONYMOUS_KEY: &str = "unattributed";

/// Category for events whose type is empty or unrecognized.
pub const GENERIC_CATEGORY: &str = "uncategorized";

/// Label for events with no human-readable fields.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Display names for well-known check families. Unlisted types fall back to
/// the uppercased raw type.
const DISPLAY_NAMES: &[(&str, &str)] = &[
    ("trade", "Trade"),
    ("inc_seq", "Seq Continuity"),
    ("rest_summary", "REST Summary"),
];

/// Canonical identity of one check stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedIdentity {
    pub key: StreamKey,
    pub label: String,
    pub category: String,
}

/// Borrowed view of the identity-bearing fields of a raw event.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawIdentity<'a> {
    pub explicit_key: Option<&'a str>,
    pub hostname: Option<&'a str>,
    pub interface: Option<&'a str>,
    pub exchange: Option<&'a str>,
    pub stage: Option<&'a str>,
    pub symbol: Option<&'a str>,
    pub check_type: Option<&'a str>,
}

impl<'a> RawIdentity<'a> {
    pub fn from_check(check: &'a IntegrityCheck) -> Self {
        Self {
            explicit_key: check.explicit_key.as_deref(),
            hostname: check.hostname.as_deref(),
            interface: check.interface.as_deref(),
            exchange: check.exchange.as_deref(),
            stage: check.stage.as_deref(),
            symbol: check.symbol.as_deref(),
            check_type: non_empty(Some(check.check_type.as_str())),
        }
    }
}

/// Resolve a raw identity into its canonical form.
pub fn resolve(raw: &RawIdentity<'_>) -> ResolvedIdentity {
    ResolvedIdentity {
        key: derive_key(raw),
        label: derive_label(raw),
        category: derive_category(raw),
    }
}

/// Convenience wrapper for integrity checks.
pub fn resolve_check(check: &IntegrityCheck) -> ResolvedIdentity {
    resolve(&RawIdentity::from_check(check))
}

/// Derive the stream key.
///
/// An explicit producer-supplied key is reused verbatim. Otherwise the
/// present fields are joined in a fixed order — hostname, interface,
/// lowercased exchange, lowercased stage, type, uppercased symbol — so the
/// key is independent of the order fields were populated.
fn derive_key(raw: &RawIdentity<'_>) -> StreamKey {
    if let Some(key) = non_empty(raw.explicit_key) {
        return StreamKey::new(key);
    }

    let mut parts: Vec<String> = Vec::new();
    if let Some(hostname) = non_empty(raw.hostname) {
        parts.push(hostname.to_string());
    }
    if let Some(interface) = non_empty(raw.interface) {
        parts.push(interface.to_string());
    }
    if let Some(exchange) = non_empty(raw.exchange) {
        parts.push(exchange.to_lowercase());
    }
    if let Some(stage) = non_empty(raw.stage) {
        parts.push(stage.to_lowercase());
    }
    if let Some(check_type) = non_empty(raw.check_type) {
        parts.push(check_type.to_string());
    }
    if let Some(symbol) = non_empty(raw.symbol) {
        parts.push(symbol.to_uppercase());
    }

    if parts.is_empty() {
        StreamKey::new(ANONYMOUS_KEY)
    } else {
        StreamKey::new(parts.join(KEY_SEPARATOR))
    }
}

/// Derive the category the stream files under.
fn derive_category(raw: &RawIdentity<'_>) -> String {
    match non_empty(raw.check_type) {
        Some("trade") => {
            let exchange = non_empty(raw.exchange).unwrap_or(UNKNOWN_LABEL);
            format!("trade/{}", slug(exchange))
        }
        Some("rest_summary") => {
            let stage = non_empty(raw.stage).unwrap_or("summary");
            format!("rest/{}", slug(stage))
        }
        Some(other) => other.to_string(),
        None => GENERIC_CATEGORY.to_string(),
    }
}

/// Derive the human-readable label: present fields joined in fixed order,
/// ending with the check family's display name.
fn derive_label(raw: &RawIdentity<'_>) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(exchange) = non_empty(raw.exchange) {
        parts.push(exchange.to_string());
    }
    if let Some(stage) = non_empty(raw.stage) {
        parts.push(stage.to_string());
    }
    if let Some(symbol) = non_empty(raw.symbol) {
        parts.push(symbol.to_uppercase());
    }
    parts.push(display_name(raw.check_type));

    let label = parts.join(" ");
    if label.is_empty() {
        UNKNOWN_LABEL.to_string()
    } else {
        label
    }
}

/// Display name for a check family.
fn display_name(check_type: Option<&str>) -> String {
    match non_empty(check_type) {
        Some(t) => DISPLAY_NAMES
            .iter()
            .find(|(key, _)| *key == t)
            .map(|(_, name)| name.to_string())
            .unwrap_or_else(|| t.to_uppercase()),
        None => UNKNOWN_LABEL.to_string(),
    }
}

/// Slugify a field for use in category paths: lowercase, runs of
/// non-alphanumeric characters collapsed to a single `-`.
pub fn slug(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_dash = false;
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade_raw<'a>() -> RawIdentity<'a> {
        RawIdentity {
            exchange: Some("binance-futures"),
            symbol: Some("DOGEUSDT"),
            check_type: Some("trade"),
            ..RawIdentity::default()
        }
    }

    #[test]
    fn test_key_embeds_exchange_and_symbol() {
        let id = resolve(&trade_raw());
        assert_eq!(id.key.as_str(), "binance-futures|trade|DOGEUSDT");
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let raw = trade_raw();
        let first = resolve(&raw);
        let second = resolve(&raw);
        assert_eq!(first, second);
    }

    #[test]
    fn test_key_is_order_independent() {
        // Same field values regardless of how the raw struct was built.
        let a = RawIdentity {
            symbol: Some("dogeusdt"),
            exchange: Some("BINANCE-FUTURES"),
            check_type: Some("trade"),
            ..RawIdentity::default()
        };
        let b = RawIdentity {
            exchange: Some("binance-futures"),
            check_type: Some("trade"),
            symbol: Some("DOGEUSDT"),
            ..RawIdentity::default()
        };
        assert_eq!(resolve(&a).key, resolve(&b).key);
    }

    #[test]
    fn test_explicit_key_reused_verbatim() {
        let raw = RawIdentity {
            explicit_key: Some("custom|key"),
            exchange: Some("okx"),
            check_type: Some("trade"),
            ..RawIdentity::default()
        };
        assert_eq!(resolve(&raw).key.as_str(), "custom|key");
    }

    #[test]
    fn test_anonymous_event_gets_sentinel_identity() {
        let id = resolve(&RawIdentity::default());
        assert_eq!(id.key.as_str(), ANONYMOUS_KEY);
        assert_eq!(id.category, GENERIC_CATEGORY);
        assert_eq!(id.label, UNKNOWN_LABEL);
    }

    #[test]
    fn test_host_interface_key() {
        let raw = RawIdentity {
            hostname: Some("cc-jp-yf-srv-195"),
            interface: Some("ens18"),
            check_type: Some("inc_seq"),
            ..RawIdentity::default()
        };
        assert_eq!(resolve(&raw).key.as_str(), "cc-jp-yf-srv-195|ens18|inc_seq");
    }

    #[test]
    fn test_trade_category_slugs_exchange() {
        assert_eq!(resolve(&trade_raw()).category, "trade/binance-futures");
    }

    #[test]
    fn test_rest_summary_category_defaults_stage() {
        let raw = RawIdentity {
            check_type: Some("rest_summary"),
            ..RawIdentity::default()
        };
        assert_eq!(resolve(&raw).category, "rest/summary");

        let staged = RawIdentity {
            check_type: Some("rest_summary"),
            stage: Some("5m"),
            ..RawIdentity::default()
        };
        assert_eq!(resolve(&staged).category, "rest/5m");
    }

    #[test]
    fn test_other_type_is_its_own_category() {
        let raw = RawIdentity {
            check_type: Some("inc_seq"),
            ..RawIdentity::default()
        };
        assert_eq!(resolve(&raw).category, "inc_seq");
    }

    #[test]
    fn test_label_composition() {
        let id = resolve(&trade_raw());
        assert_eq!(id.label, "binance-futures DOGEUSDT Trade");

        let unknown_type = RawIdentity {
            exchange: Some("okx"),
            check_type: Some("depth_drift"),
            ..RawIdentity::default()
        };
        assert_eq!(resolve(&unknown_type).label, "okx DEPTH_DRIFT");
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("Binance Futures"), "binance-futures");
        assert_eq!(slug("rest_summary"), "rest-summary");
        assert_eq!(slug("5m"), "5m");
        assert_eq!(slug("__weird--input__"), "weird-input");
    }
}
