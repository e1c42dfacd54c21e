//! Shared types for the forwarding pipeline.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Routes ──────────────────────────────────────────────────────────

/// Identifier of an outbound line (e.g. one SIM slot on a dual-SIM device).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteId(pub String);

impl RouteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The route the relay channel sends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundRoute {
    Specific(RouteId),
    /// Let the platform pick its default outbound line.
    SystemDefault,
}

impl fmt::Display for OutboundRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Specific(id) => write!(f, "{id}"),
            Self::SystemDefault => f.write_str("system-default"),
        }
    }
}

// ── Channels ────────────────────────────────────────────────────────

/// A forwarding channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Device-to-device relay to the peer phone number.
    Relay,
    /// SMTP forwarding to the configured recipients.
    Email,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Relay, Channel::Email];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Relay => "relay",
            Self::Email => "email",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ── Inbound fragments ───────────────────────────────────────────────

/// Identifies the multi-part message a fragment belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub sender: Option<String>,
    pub reference: u32,
}

/// One physical piece of an inbound text message, as delivered by the
/// telephony subsystem. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFragment {
    /// Originating address; absent when the telephony layer could not decode it.
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    pub received_at: DateTime<Utc>,
    /// Concatenation reference shared by all parts of one message.
    #[serde(default)]
    pub reference: u32,
    #[serde(default)]
    pub sequence_index: u32,
    #[serde(default = "default_total_parts")]
    pub total_parts: u32,
    /// Line the fragment arrived on, if known.
    #[serde(default)]
    pub source_route: Option<RouteId>,
}

fn default_total_parts() -> u32 {
    1
}

impl MessageFragment {
    /// Build a single-part fragment.
    pub fn new(sender: impl Into<String>, body: impl Into<String>, received_at: DateTime<Utc>) -> Self {
        Self {
            sender: Some(sender.into()),
            body: Some(body.into()),
            received_at,
            reference: 0,
            sequence_index: 0,
            total_parts: 1,
            source_route: None,
        }
    }

    /// Mark this fragment as part `index` of `total` under `reference`.
    pub fn with_part(mut self, reference: u32, index: u32, total: u32) -> Self {
        self.reference = reference;
        self.sequence_index = index;
        self.total_parts = total;
        self
    }

    pub fn with_route(mut self, route: RouteId) -> Self {
        self.source_route = Some(route);
        self
    }

    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            sender: self.sender.clone(),
            reference: self.reference,
        }
    }

    /// A fragment is forwardable only with both a sender and a body.
    pub fn is_valid(&self) -> bool {
        self.sender.as_deref().is_some_and(|s| !s.trim().is_empty()) && self.body.is_some()
    }
}

// ── Logical messages ────────────────────────────────────────────────

/// Key a logical message is tracked under across retries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageKey {
    pub sender: String,
    pub reference: u32,
    pub content_hash: u64,
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}:{:016x}", self.sender, self.reference, self.content_hash)
    }
}

/// A fully reassembled inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalMessage {
    pub sender: String,
    pub reference: u32,
    pub body: String,
    /// Arrival time of the earliest fragment.
    pub received_at: DateTime<Utc>,
    /// Route of the first fragment in assembly order, if known.
    pub inbound_route: Option<RouteId>,
    pub parts: usize,
}

impl LogicalMessage {
    pub fn key(&self) -> MessageKey {
        let mut hasher = DefaultHasher::new();
        self.body.hash(&mut hasher);
        self.received_at.timestamp_millis().hash(&mut hasher);
        MessageKey {
            sender: self.sender.clone(),
            reference: self.reference,
            content_hash: hasher.finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_without_sender_is_invalid() {
        let mut frag = MessageFragment::new("+4366412345", "hi", Utc::now());
        assert!(frag.is_valid());
        frag.sender = None;
        assert!(!frag.is_valid());
    }

    #[test]
    fn fragment_with_blank_sender_is_invalid() {
        let frag = MessageFragment::new("  ", "hi", Utc::now());
        assert!(!frag.is_valid());
    }

    #[test]
    fn fragment_without_body_is_invalid() {
        let mut frag = MessageFragment::new("+4366412345", "hi", Utc::now());
        frag.body = None;
        assert!(!frag.is_valid());
    }

    #[test]
    fn fragment_deserializes_with_defaults() {
        let json = r#"{
            "sender": "+4366412345",
            "body": "Hello",
            "received_at": "2026-03-01T10:00:00Z"
        }"#;
        let frag: MessageFragment = serde_json::from_str(json).unwrap();
        assert_eq!(frag.total_parts, 1);
        assert_eq!(frag.sequence_index, 0);
        assert!(frag.source_route.is_none());
    }

    #[test]
    fn fragment_deserializes_route_as_plain_string() {
        let json = r#"{
            "sender": "+4366412345",
            "body": "Hello",
            "received_at": "2026-03-01T10:00:00Z",
            "reference": 7,
            "sequence_index": 1,
            "total_parts": 2,
            "source_route": "1"
        }"#;
        let frag: MessageFragment = serde_json::from_str(json).unwrap();
        assert_eq!(frag.source_route, Some(RouteId::new("1")));
        assert_eq!(frag.group_key().reference, 7);
    }

    #[test]
    fn message_key_depends_on_content() {
        let now = Utc::now();
        let a = LogicalMessage {
            sender: "+43664".into(),
            reference: 7,
            body: "Hello".into(),
            received_at: now,
            inbound_route: None,
            parts: 1,
        };
        let mut b = a.clone();
        assert_eq!(a.key(), b.key());
        b.body = "Bye".into();
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn channel_labels() {
        assert_eq!(Channel::Relay.to_string(), "relay");
        assert_eq!(Channel::Email.to_string(), "email");
    }

    #[test]
    fn outbound_route_display() {
        assert_eq!(OutboundRoute::Specific(RouteId::new("2")).to_string(), "2");
        assert_eq!(OutboundRoute::SystemDefault.to_string(), "system-default");
    }
}
