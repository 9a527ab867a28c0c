//! Network module
//!
//! This module owns the TCP connection to a controller: connect, node
//! address handshake and the request/response round trip.

pub mod channel;

pub use self::channel::{ChannelState, CommandChannel};
