//! The protocol contract — the capability set every network-level
//! protocol module implements.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use swarmlink_wire::{Envelope, Message};
use tracing::debug;

/// Outbound-send capability handed to a protocol at registration time.
///
/// This is the only shared reference a protocol holds back toward the
/// network; it is used solely to route response envelopes.
#[async_trait]
pub trait OutboundSender: Send + Sync + 'static {
    /// The network-side identity stamped as `sender_id` on responses.
    fn local_id(&self) -> String;

    /// Route a protocol message to its relevant agent. Returns false on
    /// any delivery failure.
    async fn send_protocol_message(&self, message: Message) -> bool;
}

/// A network-level protocol module.
#[async_trait]
pub trait NetworkProtocol: Send + Sync {
    /// Protocol name, unique per network instance.
    fn name(&self) -> &str;

    /// Prepare the protocol for use.
    fn initialize(&self) -> bool {
        true
    }

    /// Release all owned resources. Must be idempotent.
    fn shutdown(&self) -> bool {
        true
    }

    /// Add an agent to this protocol's active set.
    fn register_agent(&self, agent_id: &str, metadata: &Map<String, Value>) -> bool;

    /// Remove an agent from this protocol's active set. Unregistering
    /// an agent that was never registered is a no-op, not an error.
    fn unregister_agent(&self, agent_id: &str) -> bool;

    /// Generic entry point for protocol-addressed envelopes not covered
    /// by the typed message hooks.
    async fn handle_message(&self, envelope: Envelope) -> Option<Envelope> {
        debug!("Protocol {} handling envelope: {envelope:?}", self.name());
        None
    }

    /// Read-only diagnostic snapshot. Must not mutate state.
    fn state(&self) -> Value;

    /// Store the outbound-send capability. Must be called exactly once
    /// before any message processing begins; a second call fails.
    fn register_with_network(&self, sender: Arc<dyn OutboundSender>) -> bool;
}
