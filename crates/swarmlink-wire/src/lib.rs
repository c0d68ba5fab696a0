//! Swarmlink wire protocol — agent-to-network messaging types.
//!
//! Everything an agent exchanges with a network server is a JSON
//! [`Envelope`]: either an application [`Message`] or a control-plane
//! system request/response. This crate defines those types and the
//! codec helpers; it contains no transport or business logic.

pub mod envelope;
pub mod message;

pub use envelope::{
    decode_envelope, encode_envelope, Envelope, SystemRequest, SystemResponse, WireError,
    GET_PROTOCOL_MANIFEST, LIST_AGENTS, LIST_PROTOCOLS, REGISTER_AGENT,
};
pub use message::{Direction, Message, MessageKind};
