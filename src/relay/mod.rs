//! Bidirectional real-time relay between the call engine and a transport

pub mod inbound;
pub mod outbound;
pub mod pacing;

pub use inbound::InboundRelay;
pub use outbound::OutboundRelay;
pub use pacing::{PacingClock, SampleClock};

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle states of a relay stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RelayState {
    Created = 0,
    Configured = 1,
    Running = 2,
    Stopped = 3,
}

/// Atomic cell holding a [`RelayState`]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: RelayState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn get(&self) -> RelayState {
        match self.0.load(Ordering::Relaxed) {
            0 => RelayState::Created,
            1 => RelayState::Configured,
            2 => RelayState::Running,
            _ => RelayState::Stopped,
        }
    }

    pub fn set(&self, state: RelayState) {
        self.0.store(state as u8, Ordering::Relaxed);
    }
}
