//! Call engine boundary
//!
//! The call engine itself (its scheduler and real-time threads) lives
//! outside this crate; the relays interact with it only through these
//! handlers. The read and write handlers may block for up to roughly one
//! frame period; that bound is the engine's contract, not the relay's.

use crate::audio::AudioFrame;

/// Delivers one device-format, fixed-duration PCM frame to the engine
pub type ReadHandler = Box<dyn FnMut(&AudioFrame) + Send>;

/// Asks the engine to fill one frame for the current pacing tick
pub type WriteHandler = Box<dyn FnMut(&mut AudioFrame) + Send>;

/// Signals fatal stream termination; invoked at most once per stream
pub type ErrorHandler = Box<dyn FnMut(i32, &str) + Send>;

/// Error code for the distinguished end-of-stream notification
pub const EOF_CODE: i32 = 0;

/// Message accompanying [`EOF_CODE`]
pub const EOF_MESSAGE: &str = "end of file";
