//! Network-level protocols for Swarmlink.
//!
//! A network server extends its behavior through pluggable protocol
//! modules implementing [`NetworkProtocol`]. Protocols never hold the
//! network itself — they receive a narrow [`OutboundSender`] capability
//! for emitting response envelopes, which keeps them testable with a
//! fake sender.

pub mod protocol;
pub mod simple_messaging;

pub use protocol::{NetworkProtocol, OutboundSender};
pub use simple_messaging::SimpleMessaging;
