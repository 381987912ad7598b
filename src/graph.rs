//! Audio processing graph boundary
//!
//! The graph converts between the engine's device format and the
//! always-16kHz/mono/S16LE wire format. Its topology is fixed at stream
//! creation; the relays drive it by pushing one fixed-size frame per call
//! and react to its events:
//!
//! - `NeedsData` / `EnoughData`: level-triggered backpressure, set and
//!   cleared asynchronously on the graph's own thread
//! - `Output`: wire-ready bytes, delivered synchronously from the sink stage
//! - `EndOfStream` / `Error`: terminal conditions
//!
//! [`PassthroughGraph`] is the provided implementation for streams whose
//! device format already equals the wire format; it also backs the relay
//! tests.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::AudioError;

/// Events emitted by a processing graph
pub enum GraphEvent {
    /// The graph wants more input pushed
    NeedsData,
    /// The graph has enough input for now
    EnoughData,
    /// Wire-ready output bytes, timestamped with the sample clock value at
    /// the start of the buffer
    Output { data: Bytes, timestamp: u64 },
    /// The upstream source ended
    EndOfStream,
    /// A fatal graph failure
    Error { code: i32, message: String },
}

/// Handler receiving graph events; invoked on the graph's thread
pub type GraphEventHandler = Box<dyn FnMut(GraphEvent) + Send>;

/// A fixed-topology audio conversion graph
pub trait AudioGraph: Send + Sync {
    /// Push one frame of audio with its sample-clock timestamp
    fn push(&self, pcm: &[u8], timestamp: u64) -> Result<(), AudioError>;

    /// Halt the graph; no events are delivered after this returns
    fn stop(&self);
}

/// Pass-through graph for device format == wire format
///
/// Forwards every pushed frame straight to the event handler as `Output`.
/// Backpressure is modeled on buffered-frame bookkeeping: the graph raises
/// `NeedsData` when its notional queue falls to the low watermark and
/// `EnoughData` when pushes outpace the notional drain.
pub struct PassthroughGraph {
    handler: Mutex<Option<GraphEventHandler>>,
    stopped: AtomicBool,
    queued: AtomicUsize,
    high_watermark: usize,
}

impl PassthroughGraph {
    /// Default notional queue depth before `EnoughData` is raised
    pub const DEFAULT_HIGH_WATERMARK: usize = 4;

    pub fn new(handler: GraphEventHandler) -> Arc<Self> {
        Self::with_watermark(handler, Self::DEFAULT_HIGH_WATERMARK)
    }

    pub fn with_watermark(handler: GraphEventHandler, high_watermark: usize) -> Arc<Self> {
        let graph = Arc::new(Self {
            handler: Mutex::new(Some(handler)),
            stopped: AtomicBool::new(false),
            queued: AtomicUsize::new(0),
            high_watermark,
        });

        // A live source starts hungry.
        graph.emit(GraphEvent::NeedsData);
        graph
    }

    /// Simulate the downstream sink consuming `frames` queued frames,
    /// re-raising `NeedsData` when the queue empties
    pub fn consume(&self, frames: usize) {
        let mut queued = self.queued.load(Ordering::Relaxed);
        loop {
            let next = queued.saturating_sub(frames);
            match self.queued.compare_exchange_weak(
                queued,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    if next == 0 {
                        self.emit(GraphEvent::NeedsData);
                    }
                    return;
                }
                Err(actual) => queued = actual,
            }
        }
    }

    /// Signal end of the upstream source
    pub fn end_of_stream(&self) {
        self.emit(GraphEvent::EndOfStream);
    }

    /// Signal a fatal failure
    pub fn fail(&self, code: i32, message: &str) {
        self.emit(GraphEvent::Error {
            code,
            message: message.to_string(),
        });
    }

    fn emit(&self, event: GraphEvent) {
        if self.stopped.load(Ordering::Relaxed) {
            return;
        }
        if let Some(handler) = self.handler.lock().as_mut() {
            handler(event);
        }
    }
}

impl AudioGraph for PassthroughGraph {
    fn push(&self, pcm: &[u8], timestamp: u64) -> Result<(), AudioError> {
        if self.stopped.load(Ordering::Relaxed) {
            return Err(AudioError::Stopped);
        }

        let queued = self.queued.fetch_add(1, Ordering::Relaxed) + 1;

        self.emit(GraphEvent::Output {
            data: Bytes::copy_from_slice(pcm),
            timestamp,
        });

        if queued >= self.high_watermark {
            self.emit(GraphEvent::EnoughData);
        }

        Ok(())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
        // Dropping the handler guarantees no event crosses a teardown.
        self.handler.lock().take();
    }
}
