//! Stream parameters and audio frames
//!
//! The call engine side of the bridge always exchanges 16-bit signed
//! little-endian PCM. Frame sizing is derived once at stream creation and
//! fixed for the lifetime of the stream.

use crate::constants::{DEFAULT_CHANNELS, DEFAULT_PTIME_MS, DEFAULT_SAMPLE_RATE};
use crate::error::ConfigError;

/// Sample format of engine-side audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// 16-bit signed little-endian PCM
    S16Le,
    /// 32-bit float PCM (not supported on the engine side)
    F32Le,
    /// Opaque raw bytes
    Raw,
}

impl SampleFormat {
    pub fn name(&self) -> &'static str {
        match self {
            SampleFormat::S16Le => "s16le",
            SampleFormat::F32Le => "f32le",
            SampleFormat::Raw => "raw",
        }
    }
}

/// Negotiated parameters for one relay stream
///
/// `ptime_raw` preserves the caller's original value: zero selects the
/// immediate-drain path in the inbound relay, while frame sizing always
/// uses the effective (defaulted) period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamParams {
    pub format: SampleFormat,
    pub srate: u32,
    pub ch: u16,
    ptime_raw: u32,
    ptime: u32,
}

impl StreamParams {
    /// Validate and normalize caller-supplied parameters.
    ///
    /// Zero sample rate, channel count or ptime mean "unset" and take the
    /// defaults (16000 Hz, mono, 20ms). Any format other than S16LE is a
    /// configuration error.
    pub fn negotiate(
        format: SampleFormat,
        srate: u32,
        ch: u16,
        ptime: u32,
    ) -> Result<Self, ConfigError> {
        if format != SampleFormat::S16Le {
            return Err(ConfigError::UnsupportedFormat(format.name().to_string()));
        }

        let srate = if srate == 0 { DEFAULT_SAMPLE_RATE } else { srate };
        let ch = if ch == 0 { DEFAULT_CHANNELS } else { ch };
        let effective_ptime = if ptime == 0 { DEFAULT_PTIME_MS } else { ptime };

        Ok(Self {
            format,
            srate,
            ch,
            ptime_raw: ptime,
            ptime: effective_ptime,
        })
    }

    /// Effective frame period in milliseconds (defaulted, never zero)
    pub fn ptime_ms(&self) -> u32 {
        self.ptime
    }

    /// Whether the caller explicitly set a frame period
    ///
    /// When false the inbound relay uses the immediate drain variant.
    pub fn is_timed(&self) -> bool {
        self.ptime_raw != 0
    }

    /// Frame period as a duration
    pub fn frame_period(&self) -> std::time::Duration {
        std::time::Duration::from_millis(u64::from(self.ptime))
    }

    /// Samples per engine frame (all channels)
    pub fn samples_per_frame(&self) -> usize {
        (self.srate as usize * self.ch as usize * self.ptime as usize) / 1000
    }

    /// Bytes per engine frame (2 bytes per S16LE sample)
    pub fn bytes_per_frame(&self) -> usize {
        2 * self.samples_per_frame()
    }
}

/// One fixed-duration PCM frame exchanged with the call engine
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Interleaved S16LE sample bytes, exactly `bytes_per_frame` long
    pub data: Vec<u8>,
    pub params: StreamParams,
    /// Discrete sample-clock timestamp (total samples at frame start)
    pub timestamp: u64,
}

impl AudioFrame {
    /// Create an all-zero (silent) frame
    pub fn silent(params: StreamParams, timestamp: u64) -> Self {
        Self {
            data: vec![0u8; params.bytes_per_frame()],
            params,
            timestamp,
        }
    }

    pub fn sample_count(&self) -> usize {
        self.data.len() / 2
    }

    pub fn is_silence(&self) -> bool {
        self.data.iter().all(|&b| b == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_derivation() {
        let p = StreamParams::negotiate(SampleFormat::S16Le, 0, 0, 0).unwrap();
        assert_eq!(p.srate, 16_000);
        assert_eq!(p.ch, 1);
        assert_eq!(p.ptime_ms(), 20);
        assert!(!p.is_timed());
        assert_eq!(p.samples_per_frame(), 320);
        assert_eq!(p.bytes_per_frame(), 640);
    }

    #[test]
    fn test_explicit_params() {
        let p = StreamParams::negotiate(SampleFormat::S16Le, 16_000, 1, 20).unwrap();
        assert!(p.is_timed());
        assert_eq!(p.samples_per_frame(), 320);
        assert_eq!(p.bytes_per_frame(), 640);

        let p = StreamParams::negotiate(SampleFormat::S16Le, 48_000, 2, 10).unwrap();
        assert_eq!(p.samples_per_frame(), 960);
        assert_eq!(p.bytes_per_frame(), 1920);
    }

    #[test]
    fn test_unsupported_format() {
        let err = StreamParams::negotiate(SampleFormat::F32Le, 16_000, 1, 20);
        assert!(matches!(err, Err(ConfigError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_silent_frame() {
        let p = StreamParams::negotiate(SampleFormat::S16Le, 16_000, 1, 20).unwrap();
        let f = AudioFrame::silent(p, 640);
        assert_eq!(f.data.len(), 640);
        assert_eq!(f.sample_count(), 320);
        assert!(f.is_silence());
        assert_eq!(f.timestamp, 640);
    }
}
