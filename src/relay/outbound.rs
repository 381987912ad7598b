//! Outbound relay: call engine -> transport
//!
//! A dedicated pacing thread pulls one frame per period from the engine and
//! pushes it into the processing graph, but only while the graph signals
//! that it needs input. The graph's sink hands wire-ready bytes back; those
//! accumulate until whole transport chunks can be sliced off and sent.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::{AudioFrame, StreamParams};
use crate::constants::MAX_CHUNKS_PER_SEND;
use crate::engine::WriteHandler;
use crate::error::Error;
use crate::graph::{AudioGraph, GraphEvent};
use crate::relay::pacing::{PacingClock, SampleClock};
use crate::relay::{RelayState, StateCell};
use crate::transport::Transport;

/// Shared state between the pacing thread, the graph callbacks and the
/// owning stream
pub struct OutboundCore {
    params: StreamParams,
    run: AtomicBool,
    // Level-triggered hint from the graph; relaxed ordering is enough
    // because no other memory is published through it.
    needs_audio: AtomicBool,
    write_handler: Mutex<WriteHandler>,
    graph: Mutex<Option<Arc<dyn AudioGraph>>>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    accumulator: Mutex<Vec<u8>>,
    chunk_bytes: usize,
    state: StateCell,
}

impl OutboundCore {
    /// React to a graph event.
    ///
    /// Backpressure callbacks run on the graph thread and only touch the
    /// atomic flag; sink output is accumulated and forwarded in transport
    /// chunks.
    pub fn handle_graph_event(&self, event: GraphEvent) {
        match event {
            GraphEvent::NeedsData => {
                self.needs_audio.store(true, Ordering::Relaxed);
            }
            GraphEvent::EnoughData => {
                self.needs_audio.store(false, Ordering::Relaxed);
            }
            GraphEvent::Output { data, .. } => self.accumulate_and_send(&data),
            GraphEvent::EndOfStream => {
                tracing::debug!("outbound: end of stream");
                self.run.store(false, Ordering::Relaxed);
                self.needs_audio.store(false, Ordering::Relaxed);
            }
            GraphEvent::Error { code, message } => {
                tracing::warn!(code, message = %message, "outbound: graph error");
                self.run.store(false, Ordering::Relaxed);
                self.needs_audio.store(false, Ordering::Relaxed);
            }
        }
    }

    /// Append sink output and forward whole chunks, at most
    /// [`MAX_CHUNKS_PER_SEND`] per callback; the remainder stays buffered
    /// for the next callback. A failed send drops that chunk with a log
    /// line and never stops the stream.
    fn accumulate_and_send(&self, data: &[u8]) {
        if !self.run.load(Ordering::Relaxed) {
            return;
        }

        let mut acc = self.accumulator.lock();
        acc.extend_from_slice(data);

        if acc.len() < self.chunk_bytes {
            tracing::trace!(buffered = acc.len(), "outbound: chunk incomplete");
            return;
        }

        let sendable = (acc.len() / self.chunk_bytes).min(MAX_CHUNKS_PER_SEND);
        let transport = self.transport.lock().clone();
        let Some(transport) = transport else {
            return;
        };

        for _ in 0..sendable {
            let chunk: Vec<u8> = acc.drain(..self.chunk_bytes).collect();
            if let Err(e) = transport.send(&chunk) {
                tracing::warn!(bytes = chunk.len(), error = %e, "outbound: send failed");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.run.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> RelayState {
        self.state.get()
    }

    /// Pacing loop body; runs on the dedicated thread for the stream's
    /// lifetime.
    fn pace(&self) {
        let period = self.params.frame_period();
        let samples_per_frame = self.params.samples_per_frame() as u64;
        let mut clock = SampleClock::new(self.params.srate);

        let graph = self.graph.lock().clone();
        let Some(graph) = graph else {
            tracing::warn!("outbound: pacing thread started without a graph");
            return;
        };

        while self.run.load(Ordering::Relaxed) {
            // Re-prime on every backpressure resume: the first push after
            // the graph asks for data again is always silence, absorbing
            // its startup latency so no real frame is dropped or delayed.
            let mut prime = true;
            let mut pacer = PacingClock::start(period);

            while self.run.load(Ordering::Relaxed) && self.needs_audio.load(Ordering::Relaxed) {
                if prime {
                    prime = false;

                    let silence = AudioFrame::silent(self.params, clock.timestamp());
                    if graph.push(&silence.data, silence.timestamp).is_ok() {
                        clock.advance(samples_per_frame);
                    }
                }

                let mut frame = AudioFrame::silent(self.params, clock.timestamp());
                // This call may block for up to one frame period; that
                // bound is the engine's contract.
                (self.write_handler.lock())(&mut frame);

                match graph.push(&frame.data, frame.timestamp) {
                    Ok(()) => clock.advance(samples_per_frame),
                    Err(e) => {
                        tracing::warn!(error = %e, "outbound: graph push failed");
                    }
                }

                let residual = pacer.advance();
                if residual > Duration::ZERO {
                    thread::sleep(residual);
                }
            }

            if self.run.load(Ordering::Relaxed) {
                // The graph is satisfied; idle until it asks again.
                thread::sleep(period / 2);
            }
        }
    }
}

/// Outbound relay stream: owns the pacing thread
pub struct OutboundRelay {
    core: Arc<OutboundCore>,
    pacer: Option<JoinHandle<()>>,
}

impl OutboundRelay {
    /// Create a configured relay; `chunk_bytes` is the transport chunk
    /// size sliced from accumulated sink output
    pub fn new(params: StreamParams, write_handler: WriteHandler, chunk_bytes: usize) -> Self {
        Self {
            core: Arc::new(OutboundCore {
                params,
                run: AtomicBool::new(false),
                needs_audio: AtomicBool::new(false),
                write_handler: Mutex::new(write_handler),
                graph: Mutex::new(None),
                transport: Mutex::new(None),
                accumulator: Mutex::new(Vec::with_capacity(chunk_bytes * (MAX_CHUNKS_PER_SEND + 1))),
                chunk_bytes,
                state: StateCell::new(RelayState::Created),
            }),
            pacer: None,
        }
    }

    /// Handle for wiring graph/transport callbacks back to this relay
    pub fn core(&self) -> Arc<OutboundCore> {
        self.core.clone()
    }

    /// Attach the processing graph and transport; must precede `start`
    pub fn attach(&self, graph: Arc<dyn AudioGraph>, transport: Arc<dyn Transport>) {
        *self.core.graph.lock() = Some(graph);
        *self.core.transport.lock() = Some(transport);
        self.core.state.set(RelayState::Configured);
    }

    /// Spawn the pacing thread
    pub fn start(&mut self) -> Result<(), Error> {
        if self.core.run.swap(true, Ordering::Relaxed) {
            return Ok(());
        }

        let core = self.core.clone();
        let handle = thread::Builder::new()
            .name("outbound-pacing".into())
            .spawn(move || core.pace())?;

        self.pacer = Some(handle);
        self.core.state.set(RelayState::Running);
        Ok(())
    }

    /// Stop pacing and join the thread.
    ///
    /// Halts the graph first so no callback lands on a stopping stream,
    /// then joins; every exit path goes through here (also via Drop).
    pub fn stop(&mut self) {
        self.core.needs_audio.store(false, Ordering::Relaxed);
        self.core.run.store(false, Ordering::Relaxed);

        if let Some(graph) = self.core.graph.lock().clone() {
            graph.stop();
        }

        if let Some(handle) = self.pacer.take() {
            tracing::debug!("outbound: stopping pacing thread");
            let _ = handle.join();
        }
        self.core.state.set(RelayState::Stopped);
    }

    pub fn state(&self) -> RelayState {
        self.core.state.get()
    }
}

impl Drop for OutboundRelay {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SampleFormat;
    use crate::error::TransportError;
    use crate::graph::PassthroughGraph;

    fn params() -> StreamParams {
        StreamParams::negotiate(SampleFormat::S16Le, 16_000, 1, 20).unwrap()
    }

    struct RecordingTransport {
        chunks: Mutex<Vec<Vec<u8>>>,
    }

    impl Transport for RecordingTransport {
        fn send(&self, chunk: &[u8]) -> Result<(), TransportError> {
            self.chunks.lock().push(chunk.to_vec());
            Ok(())
        }
    }

    fn wire(
        write_handler: WriteHandler,
        chunk_bytes: usize,
    ) -> (OutboundRelay, Arc<PassthroughGraph>, Arc<RecordingTransport>) {
        let relay = OutboundRelay::new(params(), write_handler, chunk_bytes);
        let core = relay.core();
        let graph = PassthroughGraph::new(Box::new(move |ev| core.handle_graph_event(ev)));
        let transport = Arc::new(RecordingTransport {
            chunks: Mutex::new(Vec::new()),
        });
        relay.attach(graph.clone(), transport.clone());
        (relay, graph, transport)
    }

    #[test]
    fn test_first_push_after_resume_is_priming_silence() {
        let frames = Arc::new(Mutex::new(Vec::<Vec<u8>>::new()));
        let frames2 = frames.clone();
        // The engine supplies non-zero audio so priming is distinguishable.
        let writer: WriteHandler = Box::new(move |frame| {
            frame.data.fill(0x42);
            frames2.lock().push(frame.data.clone());
        });

        let (mut relay, _graph, transport) = wire(writer, 640);

        // needs_audio was raised by graph construction, before start.
        relay.start().unwrap();
        std::thread::sleep(Duration::from_millis(90));
        relay.stop();

        let sent = transport.chunks.lock();
        assert!(sent.len() >= 2, "expected priming plus real frames");
        assert!(
            sent[0].iter().all(|&b| b == 0),
            "first chunk after resume must be the all-zero priming frame"
        );
        assert!(sent[1].iter().all(|&b| b == 0x42));
    }

    #[test]
    fn test_chunk_cap_and_remainder() {
        let writer: WriteHandler = Box::new(|_| {});
        let relay = OutboundRelay::new(params(), writer, 100);
        let transport = Arc::new(RecordingTransport {
            chunks: Mutex::new(Vec::new()),
        });
        let graph = {
            let core = relay.core();
            PassthroughGraph::new(Box::new(move |ev| core.handle_graph_event(ev)))
        };
        relay.attach(graph, transport.clone());
        relay.core().run.store(true, Ordering::Relaxed);

        // 450 bytes: enough for four chunks, but at most three may go out;
        // the remaining 150 stay buffered.
        relay.core().accumulate_and_send(&vec![7u8; 450]);
        assert_eq!(transport.chunks.lock().len(), 3);
        assert_eq!(relay.core().accumulator.lock().len(), 150);

        // The retained 150 bytes plus 50 new ones make two whole chunks,
        // both under the per-callback cap.
        relay.core().accumulate_and_send(&vec![8u8; 50]);
        assert_eq!(transport.chunks.lock().len(), 5);
        assert_eq!(relay.core().accumulator.lock().len(), 0);

        let sent = transport.chunks.lock();
        assert_eq!(&sent[3][..], &[7u8; 100][..]);
        assert_eq!(&sent[4][..50], &[7u8; 50][..]);
        assert_eq!(&sent[4][50..], &[8u8; 50][..]);
    }

    #[test]
    fn test_short_output_retained() {
        let writer: WriteHandler = Box::new(|_| {});
        let (relay, _graph, transport) = wire(writer, 960);
        relay.core().run.store(true, Ordering::Relaxed);

        relay.core().accumulate_and_send(&[1u8; 500]);
        assert!(transport.chunks.lock().is_empty());
        assert_eq!(relay.core().accumulator.lock().len(), 500);
    }

    #[test]
    fn test_failed_send_does_not_stop_stream() {
        struct FailingTransport;
        impl Transport for FailingTransport {
            fn send(&self, _chunk: &[u8]) -> Result<(), TransportError> {
                Err(TransportError::SendFailed("unreachable".into()))
            }
        }

        let writer: WriteHandler = Box::new(|_| {});
        let relay = OutboundRelay::new(params(), writer, 100);
        let graph = {
            let core = relay.core();
            PassthroughGraph::new(Box::new(move |ev| core.handle_graph_event(ev)))
        };
        relay.attach(graph, Arc::new(FailingTransport));
        relay.core().run.store(true, Ordering::Relaxed);

        relay.core().accumulate_and_send(&[0u8; 300]);
        assert!(relay.core().is_running());
    }

    #[test]
    fn test_stop_joins_and_transitions_state() {
        let writer: WriteHandler = Box::new(|_| {});
        let (mut relay, _graph, _transport) = wire(writer, 640);
        assert_eq!(relay.state(), RelayState::Configured);

        relay.start().unwrap();
        assert_eq!(relay.state(), RelayState::Running);

        relay.stop();
        assert_eq!(relay.state(), RelayState::Stopped);
        assert!(!relay.core().is_running());
    }
}
