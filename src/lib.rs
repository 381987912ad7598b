//! # Intercom Bridge
//!
//! Bridges a pull-based, fixed-period call engine with push-based external
//! audio transports.
//!
//! The call engine requests and delivers fixed-size 16-bit PCM frames on a
//! fixed cadence (one frame per "ptime" milliseconds). The transports, a
//! UDP/RTP socket pair or an internal pub/sub message bus, deliver packets
//! at irregular times and irregular sizes. The bridge sits between the two:
//!
//! ```text
//!                         INBOUND (transport -> engine)
//!  ┌───────────┐ packets ┌───────┐ wire PCM ┌──────────────┐ frame ┌────────┐
//!  │ Transport ├────────►│ Graph ├─────────►│ ElasticBuffer├──────►│ Engine │
//!  └───────────┘         └───────┘          │  + catch-up  │ /ptime└────────┘
//!                                           └──────────────┘
//!
//!                         OUTBOUND (engine -> transport)
//!  ┌────────┐ frame ┌──────────────┐ push  ┌───────┐ chunks ┌───────────┐
//!  │ Engine ├──────►│ pacing thread├──────►│ Graph ├───────►│ Transport │
//!  └────────┘ /tick │ + priming    │       └───┬───┘  ≤3    └───────────┘
//!                   └──────▲───────┘           │
//!                          └── needs-audio ────┘
//! ```
//!
//! A loosely coupled broker subsystem maintains an MQTT connection for
//! telemetry events and a small JSON group-management command protocol.

pub mod audio;
pub mod broker;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod graph;
pub mod relay;
pub mod stream;
pub mod transport;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Sample rate used when the caller leaves it unset, and the fixed
    /// wire clock rate for outgoing buffer timestamps
    pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

    /// Channel count used when the caller leaves it unset
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Frame period used when the caller leaves it unset
    pub const DEFAULT_PTIME_MS: u32 = 20;

    /// Size of one bus audio chunk (30ms of 16kHz mono S16LE)
    pub const BUS_CHUNK_BYTES: usize = 960;

    /// Maximum transport chunks forwarded per graph output callback
    pub const MAX_CHUNKS_PER_SEND: usize = 3;

    /// Bytes of audio payload header on bus messages (byte 0 = endpoint id)
    pub const BUS_AUDIO_HEADER_BYTES: usize = 4;

    /// Elastic buffer backlog above which a warning is logged (1s of
    /// 16kHz mono S16LE)
    pub const BUFFER_WARN_BYTES: usize = 32_000;

    /// Delay between broker reconnection attempts
    pub const BROKER_RECONNECT_DELAY: Duration = Duration::from_secs(2);

    /// Receive timeout for bus subscription polling
    pub const BUS_RECV_TIMEOUT: Duration = Duration::from_millis(10);

    /// RTP payload type for L16 audio
    pub const RTP_PAYLOAD_TYPE: u8 = 96;
}
