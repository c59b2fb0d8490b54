//! Identifier types for monitored entities
//!
//! `NodeKey` identifies one monitored link (hostname + interface), `StreamKey`
//! identifies one integrity-check series, and `EventId` uses UUID v7 so events
//! can be efficiently ordered by creation time.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Separator used in the textual form of compound keys.
pub const KEY_SEPARATOR: &str = "|";

/// Identifier for one monitored node: a (hostname, interface) pair.
///
/// Textual form is `hostname|interface` (e.g. `cc-jp-yf-srv-195|ens18`),
/// which is the form used in API query parameters and wire messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey {
    pub hostname: String,
    pub interface: String,
}

impl NodeKey {
    pub fn new(hostname: impl Into<String>, interface: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            interface: interface.into(),
        }
    }

    /// Parse the `hostname|interface` textual form.
    ///
    /// Both parts must be non-empty and the interface part must not itself
    /// contain the separator.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.splitn(2, KEY_SEPARATOR);
        let hostname = parts.next()?;
        let interface = parts.next()?;
        if hostname.is_empty() || interface.is_empty() || interface.contains(KEY_SEPARATOR) {
            return None;
        }
        Some(Self::new(hostname, interface))
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.hostname, KEY_SEPARATOR, self.interface)
    }
}

/// Canonical identifier for one integrity-check series.
///
/// Derived deterministically from event metadata by the identity resolver;
/// opaque everywhere else.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamKey(String);

impl StreamKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StreamKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Unique identifier for an ingested event
///
/// Uses UUID v7 for time-based sorting. Assigned exactly once, at the
/// normalization boundary; repeated resolution of the same event never
/// mints a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Create a new EventId with current timestamp
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create from existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get inner UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
