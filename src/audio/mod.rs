//! Audio frame parameters and elastic buffering

pub mod buffer;
pub mod params;

pub use buffer::ElasticBuffer;
pub use params::{AudioFrame, SampleFormat, StreamParams};
