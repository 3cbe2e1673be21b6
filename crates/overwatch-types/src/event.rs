use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scope::ScopeId;

/// One inbound event from the gateway's live feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GatewayEvent {
    Content(ContentEvent),
    Membership(MembershipEvent),
}

impl GatewayEvent {
    pub fn scope_id(&self) -> ScopeId {
        match self {
            GatewayEvent::Content(ev) => ev.scope_id,
            GatewayEvent::Membership(ev) => ev.scope_id,
        }
    }
}

/// A new message observed in a scope. Service messages that add members
/// arrive as content too, with the added ids in `added_actor_ids`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentEvent {
    pub scope_id: ScopeId,
    pub message_id: i64,
    #[serde(default)]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub text: String,
    /// True for messages authored by the monitoring account itself.
    #[serde(default)]
    pub outgoing: bool,
    pub sent_at: DateTime<Utc>,
    #[serde(default)]
    pub added_actor_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MembershipChange {
    Joined,
    Left,
}

impl MembershipChange {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipChange::Joined => "joined",
            MembershipChange::Left => "left",
        }
    }
}

/// An explicit join/leave (including add/kick, which the gateway folds
/// into the same two directions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipEvent {
    pub scope_id: ScopeId,
    pub actor_id: String,
    pub change: MembershipChange,
    pub at: DateTime<Utc>,
}

/// Destination of an outbound send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SendTarget {
    Scope(ScopeId),
    /// The account's own saved-messages chat.
    Operator,
}

/// Acknowledgement of a delivered (or scheduled) message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentMessage {
    pub message_id: i64,
    pub ts: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_event_wire_shape() {
        let raw = r#"{
            "kind": "content",
            "scope_id": -1001234,
            "message_id": 42,
            "actor_id": "555111",
            "text": "hello",
            "sent_at": "2024-05-01T12:00:00Z"
        }"#;
        let ev: GatewayEvent = serde_json::from_str(raw).unwrap();
        let GatewayEvent::Content(ev) = ev else {
            panic!("expected content event");
        };
        assert_eq!(ev.scope_id, -1001234);
        assert_eq!(ev.actor_id.as_deref(), Some("555111"));
        assert!(!ev.outgoing);
        assert!(ev.added_actor_ids.is_empty());
    }

    #[test]
    fn membership_event_wire_shape() {
        let raw = r#"{
            "kind": "membership",
            "scope_id": -9,
            "actor_id": "777",
            "change": "joined",
            "at": "2024-05-01T12:00:00Z"
        }"#;
        let ev: GatewayEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(ev.scope_id(), -9);
        let GatewayEvent::Membership(ev) = ev else {
            panic!("expected membership event");
        };
        assert_eq!(ev.change, MembershipChange::Joined);
    }

    #[test]
    fn send_target_serializes_compactly() {
        assert_eq!(
            serde_json::to_string(&SendTarget::Scope(-5)).unwrap(),
            r#"{"scope":-5}"#
        );
        assert_eq!(
            serde_json::to_string(&SendTarget::Operator).unwrap(),
            r#""operator""#
        );
    }
}
