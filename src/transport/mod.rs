//! Transport bindings
//!
//! A transport moves wire-format audio bytes in and out of the bridge.
//! Outbound, the relays call [`Transport::send`] with one chunk at a time;
//! inbound, each binding runs its own receive context and pushes payloads
//! toward the stream's processing graph.

pub mod bus;
pub mod udp;

use crate::error::TransportError;

/// Outbound byte transport
pub trait Transport: Send + Sync {
    /// Send one wire chunk; failures are per-chunk and non-fatal
    fn send(&self, chunk: &[u8]) -> Result<(), TransportError>;
}
