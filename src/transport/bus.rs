//! Internal message-bus binding
//!
//! Bus endpoints publish and subscribe by integer message type plus a
//! sub-index (wildcard-capable). Audio messages carry a 4-byte application
//! header (byte 0 is the endpoint identity, bytes 1-3 are reserved)
//! followed by raw 16kHz/mono/S16LE PCM.
//!
//! [`LocalBus`] is an in-process implementation over crossbeam channels,
//! used for single-process wiring and tests; a networked bus agent plugs in
//! behind the same [`Bus`] trait.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::constants::{BUS_AUDIO_HEADER_BYTES, BUS_RECV_TIMEOUT};
use crate::error::{Error, TransportError};
use crate::transport::Transport;

/// Matches any sub-index in a subscription
pub const WILDCARD: u32 = u32::MAX;

/// Bus message types
pub mod msg {
    /// Audio from the bus toward a headset endpoint
    pub const AUDIO_HEADSET_RX: u16 = 400;
    /// Audio from a headset endpoint toward the bus
    pub const AUDIO_HEADSET_TX: u16 = 401;
    /// A lane conversation started
    pub const LANE_TALK_START: u16 = 402;
    /// A lane conversation stopped
    pub const LANE_TALK_STOP: u16 = 403;
    /// Headset availability changed
    pub const HEADSET_AVAIL_STATUS: u16 = 404;
    /// Join one headset to a group
    pub const GROUP_JOIN: u16 = 1260;
    /// Remove one headset from its group
    pub const GROUP_LEAVE: u16 = 1261;
    /// Request the current group assignments
    pub const GROUPS_QUERY: u16 = 1262;
    /// Current group assignments (count byte + id pairs)
    pub const GROUPS_STATUS: u16 = 1263;
    /// Bulk group assignment (count byte + id pairs)
    pub const GROUPS_ASSIGN: u16 = 1264;
    /// Simulated headset button press
    pub const BUTTON_EVENT: u16 = 1265;
}

/// One bus message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub msg_type: u16,
    pub index: u32,
    pub data: Vec<u8>,
}

impl BusMessage {
    pub fn new(msg_type: u16, index: u32, data: Vec<u8>) -> Self {
        Self {
            msg_type,
            index,
            data,
        }
    }

    /// Wrap PCM in an audio message for `ppid`
    pub fn audio(msg_type: u16, ppid: u8, pcm: &[u8]) -> Self {
        let mut data = vec![0u8; BUS_AUDIO_HEADER_BYTES + pcm.len()];
        data[0] = ppid;
        data[BUS_AUDIO_HEADER_BYTES..].copy_from_slice(pcm);
        Self {
            msg_type,
            index: 0,
            data,
        }
    }

    /// Endpoint identity from the audio header
    pub fn audio_ppid(&self) -> Option<u8> {
        self.data.first().copied()
    }

    /// PCM payload behind the audio header
    pub fn audio_payload(&self) -> Option<&[u8]> {
        self.data.get(BUS_AUDIO_HEADER_BYTES..)
    }
}

/// A pub/sub message bus endpoint
pub trait Bus: Send + Sync {
    fn send(&self, message: BusMessage) -> Result<(), TransportError>;
    fn subscribe(&self, msg_type: u16, index: u32) -> Result<(), TransportError>;
    /// Receive the next subscribed message, or `None` on timeout
    fn recv_timeout(&self, timeout: Duration) -> Result<Option<BusMessage>, TransportError>;
}

struct Subscription {
    msg_type: u16,
    index: u32,
    tx: Sender<BusMessage>,
}

/// Shared in-process bus fabric
#[derive(Default)]
pub struct LocalBusFabric {
    subscriptions: Mutex<Vec<Subscription>>,
}

impl LocalBusFabric {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create an endpoint attached to this fabric
    pub fn endpoint(self: &Arc<Self>) -> LocalBus {
        let (tx, rx) = unbounded();
        LocalBus {
            fabric: self.clone(),
            tx,
            rx,
        }
    }

    fn dispatch(&self, message: &BusMessage) {
        for sub in self.subscriptions.lock().iter() {
            if sub.msg_type == message.msg_type
                && (sub.index == WILDCARD || sub.index == message.index)
            {
                let _ = sub.tx.send(message.clone());
            }
        }
    }
}

/// In-process bus endpoint
pub struct LocalBus {
    fabric: Arc<LocalBusFabric>,
    tx: Sender<BusMessage>,
    rx: Receiver<BusMessage>,
}

impl Bus for LocalBus {
    fn send(&self, message: BusMessage) -> Result<(), TransportError> {
        self.fabric.dispatch(&message);
        Ok(())
    }

    fn subscribe(&self, msg_type: u16, index: u32) -> Result<(), TransportError> {
        self.fabric.subscriptions.lock().push(Subscription {
            msg_type,
            index,
            tx: self.tx.clone(),
        });
        Ok(())
    }

    fn recv_timeout(&self, timeout: Duration) -> Result<Option<BusMessage>, TransportError> {
        match self.rx.recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::ReceiveFailed(
                "bus endpoint disconnected".into(),
            )),
        }
    }
}

/// Outbound audio sender over a bus endpoint
pub struct BusAudioSender {
    bus: Arc<dyn Bus>,
    ppid: u8,
}

impl BusAudioSender {
    pub fn new(bus: Arc<dyn Bus>, ppid: u8) -> Self {
        Self { bus, ppid }
    }
}

impl Transport for BusAudioSender {
    fn send(&self, chunk: &[u8]) -> Result<(), TransportError> {
        let message = BusMessage::audio(msg::AUDIO_HEADSET_TX, self.ppid, chunk);
        let bytes = message.data.len();
        self.bus.send(message).map_err(|e| {
            TransportError::BusSend(format!("{} byte audio message: {}", bytes, e))
        })
    }
}

/// Inbound audio subscription: a receive thread that filters audio
/// messages for one endpoint identity and forwards their PCM payload
pub struct BusAudioReceiver {
    run: Arc<AtomicBool>,
    rx_thread: Option<JoinHandle<()>>,
}

impl BusAudioReceiver {
    /// Subscribe and spawn the receive thread.
    ///
    /// `deliver` is invoked with each matching PCM payload; `on_error` is
    /// invoked once if the receive path dies, never on a plain `stop`.
    pub fn start(
        bus: Arc<dyn Bus>,
        ppid: u8,
        mut deliver: Box<dyn FnMut(&[u8]) + Send>,
        on_error: Box<dyn FnOnce() + Send>,
    ) -> Result<Self, Error> {
        bus.subscribe(msg::AUDIO_HEADSET_RX, WILDCARD)?;

        let run = Arc::new(AtomicBool::new(true));
        let run_for_loop = run.clone();

        let handle = thread::Builder::new()
            .name("bus-audio-rx".into())
            .spawn(move || {
                let mut on_error = Some(on_error);
                while run_for_loop.load(Ordering::Relaxed) {
                    let message = match bus.recv_timeout(BUS_RECV_TIMEOUT) {
                        Ok(Some(message)) => message,
                        Ok(None) => continue,
                        Err(e) => {
                            tracing::warn!(error = %e, "bus-audio-rx: receive failed");
                            if let Some(on_error) = on_error.take() {
                                on_error();
                            }
                            break;
                        }
                    };

                    if message.msg_type != msg::AUDIO_HEADSET_RX {
                        continue;
                    }

                    match message.audio_ppid() {
                        Some(got) if got == ppid => {}
                        Some(got) => {
                            tracing::trace!(got, expected = ppid, "bus-audio-rx: ignoring message");
                            continue;
                        }
                        None => continue,
                    }

                    if let Some(pcm) = message.audio_payload() {
                        deliver(pcm);
                    }
                }
            })?;

        Ok(Self {
            run,
            rx_thread: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.run.store(false, Ordering::Relaxed);
        if let Some(handle) = self.rx_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for BusAudioReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}
