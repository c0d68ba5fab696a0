//! Wire envelopes — the outer wrapper distinguishing application
//! messages from control-plane system traffic.
//!
//! Every frame on the wire is one JSON-encoded [`Envelope`].

use crate::message::Message;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Register the connecting agent with the network.
pub const REGISTER_AGENT: &str = "register_agent";
/// Request the list of agents on the network.
pub const LIST_AGENTS: &str = "list_agents";
/// Request the list of protocols the network runs.
pub const LIST_PROTOCOLS: &str = "list_protocols";
/// Request a protocol manifest; takes `protocol_name`.
pub const GET_PROTOCOL_MANIFEST: &str = "get_protocol_manifest";

/// Errors from envelope encoding/decoding.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A wire envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// An application message.
    Message {
        /// The message payload.
        data: Message,
    },
    /// A control-plane request to the network server.
    SystemRequest(SystemRequest),
    /// A control-plane response from the network server.
    SystemResponse(SystemResponse),
}

/// A named system command with flattened parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemRequest {
    /// The command name (see the `*_AGENT`/`LIST_*` constants).
    pub command: String,
    /// Command parameters, flattened into the envelope object.
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

/// The server's reply to a system command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemResponse {
    /// Echo of the command this responds to.
    pub command: String,
    /// Whether the command succeeded.
    pub success: bool,
    /// Extra response fields (e.g. `network_name`), flattened.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SystemRequest {
    /// Build a request from a command name and parameter map.
    pub fn new(command: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            command: command.into(),
            params,
        }
    }
}

/// Serialize an envelope to its JSON wire form.
pub fn encode_envelope(envelope: &Envelope) -> Result<String, WireError> {
    Ok(serde_json::to_string(envelope)?)
}

/// Parse a JSON wire frame into an envelope.
pub fn decode_envelope(raw: &str) -> Result<Envelope, WireError> {
    Ok(serde_json::from_str(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_envelope_shape() {
        let mut content = Map::new();
        content.insert("text".to_string(), json!("hi"));
        let envelope = Envelope::Message {
            data: Message::direct("agent-2", content),
        };

        let raw = encode_envelope(&envelope).unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["data"]["message_type"], "direct_message");
        assert_eq!(value["data"]["target_agent_id"], "agent-2");
    }

    #[test]
    fn test_system_request_params_are_flattened() {
        let mut params = Map::new();
        params.insert("agent_id".to_string(), json!("agent-1"));
        params.insert("metadata".to_string(), json!({"role": "worker"}));
        let envelope = Envelope::SystemRequest(SystemRequest::new(REGISTER_AGENT, params));

        let value: Value =
            serde_json::from_str(&encode_envelope(&envelope).unwrap()).unwrap();
        assert_eq!(value["type"], "system_request");
        assert_eq!(value["command"], "register_agent");
        // Params sit at the top level of the envelope, not nested.
        assert_eq!(value["agent_id"], "agent-1");
        assert_eq!(value["metadata"]["role"], "worker");
    }

    #[test]
    fn test_system_response_roundtrip() {
        let raw = r#"{"type":"system_response","command":"register_agent","success":true,"network_name":"testnet"}"#;
        let envelope = decode_envelope(raw).unwrap();
        match envelope {
            Envelope::SystemResponse(resp) => {
                assert_eq!(resp.command, REGISTER_AGENT);
                assert!(resp.success);
                assert_eq!(resp.extra["network_name"], "testnet");
            }
            other => panic!("Expected SystemResponse, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        assert!(decode_envelope(r#"{"type":"telemetry","data":{}}"#).is_err());
        assert!(decode_envelope("not json").is_err());
    }
}
