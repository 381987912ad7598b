//! Inbound relay: transport -> call engine
//!
//! Transport deliveries are bursty (one packet can carry several frame
//! periods' worth of audio) while the engine expects exactly one frame per
//! period. Each delivery appends to the elastic buffer and then runs a
//! bounded catch-up loop: drain one frame, hand it to the engine, and if a
//! full frame is still buffered sleep half a period and drain again. The
//! half-period sleep catches up on backlog without saturating a core.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::{AudioFrame, ElasticBuffer, StreamParams};
use crate::engine::{ErrorHandler, ReadHandler, EOF_CODE, EOF_MESSAGE};
use crate::error::{AudioError, Error};
use crate::graph::GraphEvent;
use crate::relay::{RelayState, StateCell};

/// Shared state between the delivery context, the watchdog thread and the
/// owning stream
pub struct InboundCore {
    params: StreamParams,
    buffer: ElasticBuffer,
    run: AtomicBool,
    eos: AtomicBool,
    error_fired: AtomicBool,
    read_handler: Mutex<ReadHandler>,
    error_handler: Mutex<Option<ErrorHandler>>,
    state: StateCell,
}

impl InboundCore {
    /// Relay one transport payload to the engine.
    ///
    /// Invoked on the graph's delivery thread. Appends the payload, then
    /// drains fixed-size frames at the engine cadence until less than one
    /// frame remains buffered.
    pub fn deliver(&self, payload: &[u8]) {
        if !self.run.load(Ordering::Relaxed) {
            return;
        }

        self.buffer.append(payload);

        let frame_bytes = self.params.bytes_per_frame();
        let half_period = self.params.frame_period() / 2;

        loop {
            if !self.run.load(Ordering::Relaxed) {
                return;
            }

            self.relay_one_frame();

            if self.buffer.len() < frame_bytes {
                break;
            }

            thread::sleep(half_period);
        }
    }

    /// Drain one frame and invoke the engine's read handler.
    ///
    /// Timed variant when a frame period is configured: waits up to one
    /// period for a full frame and skips the engine entirely when it does
    /// not arrive. Immediate variant otherwise: delivers whatever is
    /// buffered, zero-padded to a full frame.
    fn relay_one_frame(&self) {
        let mut frame = AudioFrame::silent(self.params, self.buffer.total_drained() / 2);

        if self.params.is_timed() {
            if let Err(AudioError::NotEnoughData { .. }) =
                self.buffer.drain_timed(&mut frame.data, self.params.frame_period())
            {
                return;
            }
        } else {
            self.buffer.drain_available(&mut frame.data);
        }

        (self.read_handler.lock())(&frame);
    }

    /// React to a graph event.
    ///
    /// `Output` carries converted wire audio into the relay; terminal
    /// events stop the stream. Errors reach the engine's error handler
    /// immediately; end-of-stream is forwarded from the watchdog tick so
    /// the notification never runs on the transport's own thread.
    pub fn handle_graph_event(&self, event: GraphEvent) {
        match event {
            GraphEvent::Output { data, .. } => self.deliver(&data),
            GraphEvent::NeedsData | GraphEvent::EnoughData => {}
            GraphEvent::EndOfStream => {
                tracing::debug!("inbound: end of stream");
                self.eos.store(true, Ordering::Relaxed);
                self.run.store(false, Ordering::Relaxed);
            }
            GraphEvent::Error { code, message } => {
                tracing::warn!(code, message = %message, "inbound: graph error");
                self.fire_error(code, &message);
                self.run.store(false, Ordering::Relaxed);
            }
        }
    }

    pub fn state(&self) -> RelayState {
        self.state.get()
    }

    pub fn is_running(&self) -> bool {
        self.run.load(Ordering::Relaxed)
    }

    fn fire_error(&self, code: i32, message: &str) {
        if self.error_fired.swap(true, Ordering::Relaxed) {
            return;
        }
        if let Some(handler) = self.error_handler.lock().as_mut() {
            handler(code, message);
        }
    }
}

/// Inbound relay stream: owns the elastic buffer and the EOS watchdog
pub struct InboundRelay {
    core: Arc<InboundCore>,
    watchdog: Option<JoinHandle<()>>,
}

impl InboundRelay {
    /// Create a configured relay; no threads run until [`start`](Self::start)
    pub fn new(
        params: StreamParams,
        read_handler: ReadHandler,
        error_handler: Option<ErrorHandler>,
    ) -> Self {
        Self {
            core: Arc::new(InboundCore {
                params,
                buffer: ElasticBuffer::new(),
                run: AtomicBool::new(false),
                eos: AtomicBool::new(false),
                error_fired: AtomicBool::new(false),
                read_handler: Mutex::new(read_handler),
                error_handler: Mutex::new(error_handler),
                state: StateCell::new(RelayState::Configured),
            }),
            watchdog: None,
        }
    }

    /// Handle for wiring graph/transport callbacks back to this relay
    pub fn core(&self) -> Arc<InboundCore> {
        self.core.clone()
    }

    /// Start relaying: raises the run flag and spawns the watchdog that
    /// forwards the end-of-stream notification on its own timer context
    pub fn start(&mut self) -> Result<(), Error> {
        if self.core.run.swap(true, Ordering::Relaxed) {
            return Ok(());
        }

        let core = self.core.clone();
        let period = self.core.params.frame_period();
        let handle = thread::Builder::new()
            .name("inbound-watchdog".into())
            .spawn(move || {
                loop {
                    thread::sleep(period);

                    if core.run.load(Ordering::Relaxed) {
                        continue;
                    }

                    if core.eos.load(Ordering::Relaxed) {
                        core.fire_error(EOF_CODE, EOF_MESSAGE);
                    }
                    break;
                }
            })?;

        self.watchdog = Some(handle);
        self.core.state.set(RelayState::Running);
        Ok(())
    }

    /// Stop the relay and join the watchdog.
    ///
    /// The caller must halt the graph/transport before this so no delivery
    /// callback executes against a stopping stream. Unconsumed bytes are
    /// discarded.
    pub fn stop(&mut self) {
        self.core.run.store(false, Ordering::Relaxed);

        if let Some(handle) = self.watchdog.take() {
            let _ = handle.join();
        }

        let leftover = self.core.buffer.len();
        if leftover > 0 {
            tracing::debug!(leftover, "inbound: discarding unconsumed bytes");
        }
        self.core.state.set(RelayState::Stopped);
    }

    pub fn state(&self) -> RelayState {
        self.core.state.get()
    }
}

impl Drop for InboundRelay {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SampleFormat;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn params() -> StreamParams {
        StreamParams::negotiate(SampleFormat::S16Le, 16_000, 1, 20).unwrap()
    }

    fn counting_reader() -> (Arc<AtomicUsize>, ReadHandler) {
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let handler: ReadHandler = Box::new(move |frame| {
            assert_eq!(frame.data.len(), 640);
            count2.fetch_add(1, Ordering::SeqCst);
        });
        (count, handler)
    }

    #[test]
    fn test_burst_delivery_drains_three_frames() {
        let (count, reader) = counting_reader();
        let mut relay = InboundRelay::new(params(), reader, None);
        relay.start().unwrap();

        // One payload worth three frame periods: exactly three engine
        // deliveries, then the loop exits with an empty buffer.
        relay.core().deliver(&vec![0x55u8; 1920]);
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(relay.core().buffer.len(), 0);

        relay.stop();
        assert_eq!(relay.state(), RelayState::Stopped);
    }

    #[test]
    fn test_partial_frame_waits_for_more() {
        let (count, reader) = counting_reader();
        let mut relay = InboundRelay::new(params(), reader, None);
        relay.start().unwrap();

        // 700 bytes: one full frame delivered, 60 bytes retained.
        relay.core().deliver(&vec![1u8; 700]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(relay.core().buffer.len(), 60);

        // The remainder completes a second frame on the next delivery.
        relay.core().deliver(&vec![2u8; 580]);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_frames_preserve_order() {
        let got = Arc::new(Mutex::new(Vec::new()));
        let got2 = got.clone();
        let reader: ReadHandler = Box::new(move |frame| {
            got2.lock().extend_from_slice(&frame.data);
        });

        let mut relay = InboundRelay::new(params(), reader, None);
        relay.start().unwrap();

        let payload: Vec<u8> = (0..1280u32).map(|i| (i % 251) as u8).collect();
        relay.core().deliver(&payload);
        assert_eq!(got.lock().as_slice(), payload.as_slice());
        relay.stop();
    }

    #[test]
    fn test_stopped_relay_ignores_delivery() {
        let (count, reader) = counting_reader();
        let mut relay = InboundRelay::new(params(), reader, None);
        relay.start().unwrap();
        relay.stop();

        relay.core().deliver(&vec![0u8; 1920]);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_eos_fires_end_of_file_once() {
        let (_count, reader) = counting_reader();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let errors2 = errors.clone();
        let error_handler: ErrorHandler = Box::new(move |code, message| {
            errors2.lock().push((code, message.to_string()));
        });

        let mut relay = InboundRelay::new(params(), reader, Some(error_handler));
        relay.start().unwrap();

        relay.core().handle_graph_event(GraphEvent::EndOfStream);
        assert!(!relay.core().is_running());

        // The watchdog ticks once per frame period.
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(errors.lock().as_slice(), &[(EOF_CODE, EOF_MESSAGE.to_string())]);

        relay.stop();
        assert_eq!(errors.lock().len(), 1);
    }

    #[test]
    fn test_graph_error_reaches_handler() {
        let (_count, reader) = counting_reader();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let errors2 = errors.clone();
        let error_handler: ErrorHandler = Box::new(move |code, message| {
            errors2.lock().push((code, message.to_string()));
        });

        let mut relay = InboundRelay::new(params(), reader, Some(error_handler));
        relay.start().unwrap();

        relay.core().handle_graph_event(GraphEvent::Error {
            code: 7,
            message: "pipeline failure".into(),
        });
        assert_eq!(errors.lock().as_slice(), &[(7, "pipeline failure".to_string())]);
        assert!(!relay.core().is_running());
        relay.stop();
    }
}
