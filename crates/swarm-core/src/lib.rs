//! # swarm-core
//!
//! Shared primitives for the swarm serving node: message envelopes, the
//! in-process message bus, and instance identity helpers.

pub mod bus;
pub mod ids;
pub mod messages;

pub use bus::MessageBus;
pub use messages::{session_key, InboundMessage, OutboundMessage};
