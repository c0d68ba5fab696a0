//! Swarmlink network connector.
//!
//! A [`Connector`] owns one websocket connection to a network server:
//! it registers the agent during connect, runs a single receive loop as
//! a background task, and dispatches incoming envelopes to handlers
//! registered by message type or system command name.

pub mod connector;

pub use connector::{ClientError, Connector, MessageHandler, SystemHandler};
