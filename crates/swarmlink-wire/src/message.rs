//! The application-level message model.
//!
//! A [`Message`] is the unit agents exchange once connected: direct
//! (one recipient), broadcast (every agent), or protocol (handled by a
//! named protocol module on the network). The kind is flattened into
//! the JSON object under the `message_type` tag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Routing direction of a protocol message, stamped once per hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Received from the network, about to be consumed locally.
    Inbound,
    /// Produced locally, about to be written to the network.
    Outbound,
}

/// An application message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID (UUIDv4 by default).
    #[serde(default = "new_message_id")]
    pub message_id: String,
    /// ID of the sending agent. Filled in by the connector when empty.
    #[serde(default)]
    pub sender_id: String,
    /// Creation time, used for history eviction ordering.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Structured key/value payload.
    #[serde(default)]
    pub content: Map<String, Value>,
    /// Message variant.
    #[serde(flatten)]
    pub kind: MessageKind,
}

/// The different kinds of application messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "message_type")]
pub enum MessageKind {
    /// Addressed to exactly one agent.
    #[serde(rename = "direct_message")]
    Direct {
        /// The receiving agent.
        target_agent_id: String,
    },
    /// Addressed to every agent on the network.
    #[serde(rename = "broadcast_message")]
    Broadcast,
    /// Handled by a named protocol module.
    #[serde(rename = "protocol_message")]
    Protocol {
        /// Name of the protocol that owns this message.
        protocol: String,
        /// Set exactly once per hop: outbound on send, inbound on consume.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        direction: Option<Direction>,
        /// The agent this hop concerns (requester or recipient).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        relevant_agent_id: Option<String>,
    },
}

fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl Message {
    /// Create a direct message to `target_agent_id`.
    pub fn direct(target_agent_id: impl Into<String>, content: Map<String, Value>) -> Self {
        Self::with_kind(
            MessageKind::Direct {
                target_agent_id: target_agent_id.into(),
            },
            content,
        )
    }

    /// Create a broadcast message.
    pub fn broadcast(content: Map<String, Value>) -> Self {
        Self::with_kind(MessageKind::Broadcast, content)
    }

    /// Create a protocol message addressed to the named protocol module.
    pub fn protocol(protocol: impl Into<String>, content: Map<String, Value>) -> Self {
        Self::with_kind(
            MessageKind::Protocol {
                protocol: protocol.into(),
                direction: None,
                relevant_agent_id: None,
            },
            content,
        )
    }

    fn with_kind(kind: MessageKind, content: Map<String, Value>) -> Self {
        Self {
            message_id: new_message_id(),
            sender_id: String::new(),
            timestamp: Utc::now(),
            content,
            kind,
        }
    }

    /// The `message_type` tag value, used as the handler-registry key.
    pub fn message_type(&self) -> &'static str {
        match self.kind {
            MessageKind::Direct { .. } => "direct_message",
            MessageKind::Broadcast => "broadcast_message",
            MessageKind::Protocol { .. } => "protocol_message",
        }
    }

    /// Whether this is a protocol message.
    pub fn is_protocol(&self) -> bool {
        matches!(self.kind, MessageKind::Protocol { .. })
    }

    /// Stamp direction and relevant agent on a protocol message.
    /// No-op for direct and broadcast messages.
    pub fn stamp_hop(&mut self, dir: Direction, agent_id: &str) {
        if let MessageKind::Protocol {
            direction,
            relevant_agent_id,
            ..
        } = &mut self.kind
        {
            *direction = Some(dir);
            *relevant_agent_id = Some(agent_id.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn content(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_direct_message_roundtrip() {
        let msg = Message::direct("agent-2", content(&[("text", json!("hello"))]));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"message_type\":\"direct_message\""));
        assert!(json.contains("agent-2"));

        let decoded: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.message_id, msg.message_id);
        assert_eq!(decoded.message_type(), "direct_message");
        match decoded.kind {
            MessageKind::Direct { target_agent_id } => assert_eq!(target_agent_id, "agent-2"),
            other => panic!("Expected Direct, got {other:?}"),
        }
    }

    #[test]
    fn test_message_ids_are_unique() {
        let a = Message::broadcast(Map::new());
        let b = Message::broadcast(Map::new());
        assert_ne!(a.message_id, b.message_id);
    }

    #[test]
    fn test_protocol_message_stamping() {
        let mut msg = Message::protocol("simple_messaging", Map::new());
        assert!(msg.is_protocol());

        msg.stamp_hop(Direction::Outbound, "agent-1");
        match &msg.kind {
            MessageKind::Protocol {
                direction,
                relevant_agent_id,
                ..
            } => {
                assert_eq!(*direction, Some(Direction::Outbound));
                assert_eq!(relevant_agent_id.as_deref(), Some("agent-1"));
            }
            other => panic!("Expected Protocol, got {other:?}"),
        }

        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"direction\":\"outbound\""));
    }

    #[test]
    fn test_stamp_is_noop_for_direct() {
        let mut msg = Message::direct("agent-2", Map::new());
        msg.stamp_hop(Direction::Inbound, "agent-1");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("direction"));
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        // A minimal wire object: only the tag and required variant fields.
        let decoded: Message = serde_json::from_str(
            r#"{"message_type":"protocol_message","protocol":"simple_messaging"}"#,
        )
        .unwrap();
        assert!(!decoded.message_id.is_empty());
        assert!(decoded.sender_id.is_empty());
        assert!(decoded.content.is_empty());
    }

    #[test]
    fn test_broadcast_has_no_extra_fields() {
        let msg = Message::broadcast(content(&[("text", json!("all"))]));
        assert_eq!(msg.message_type(), "broadcast_message");
        assert!(!msg.is_protocol());
    }
}
