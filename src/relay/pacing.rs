//! Pacing and sample clocks
//!
//! The pacing clock accumulates its reference instant instead of
//! recomputing it from `now()` each tick, so imprecise thread wake-ups do
//! not drift the long-run cadence. The sample clock is the discrete
//! timestamp source for outgoing buffers: a running total-sample counter
//! against the fixed wire clock rate.

use std::time::{Duration, Instant};

/// Monotonic frame-period tick reference with drift compensation
pub struct PacingClock {
    period: Duration,
    next: Instant,
}

impl PacingClock {
    /// Start a fresh reference at the current instant
    pub fn start(period: Duration) -> Self {
        Self {
            period,
            next: Instant::now(),
        }
    }

    /// Advance the reference by one period and return the residual sleep,
    /// `max(0, next - now)`
    pub fn advance(&mut self) -> Duration {
        self.next += self.period;
        self.next.saturating_duration_since(Instant::now())
    }
}

/// Running total-sample counter at a fixed clock rate
#[derive(Debug, Clone, Copy)]
pub struct SampleClock {
    total: u64,
    rate: u32,
}

impl SampleClock {
    pub fn new(rate: u32) -> Self {
        Self { total: 0, rate }
    }

    /// Timestamp for the next buffer: total samples pushed so far
    pub fn timestamp(&self) -> u64 {
        self.total
    }

    /// Account for `samples` pushed samples
    pub fn advance(&mut self, samples: u64) {
        self.total += samples;
    }

    /// Timestamp in whole nanoseconds of stream time
    pub fn as_nanos(&self) -> u64 {
        self.total * 1_000_000_000 / u64::from(self.rate)
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pacing_accumulates_reference() {
        let period = Duration::from_millis(10);
        let mut clock = PacingClock::start(period);

        // Burn more than one period without sleeping; the residuals must
        // shrink to zero rather than resetting to a full period.
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(clock.advance(), Duration::ZERO);
        assert_eq!(clock.advance(), Duration::ZERO);
        // Third tick lands at t=30ms, at most 5ms ahead of now.
        assert!(clock.advance() <= Duration::from_millis(5));
    }

    #[test]
    fn test_pacing_residual_bounded_by_period() {
        let period = Duration::from_millis(50);
        let mut clock = PacingClock::start(period);
        assert!(clock.advance() <= period);
    }

    #[test]
    fn test_sample_clock() {
        let mut clock = SampleClock::new(16_000);
        assert_eq!(clock.timestamp(), 0);

        clock.advance(320);
        assert_eq!(clock.timestamp(), 320);
        // 320 samples at 16kHz is exactly 20ms.
        assert_eq!(clock.as_nanos(), 20_000_000);

        clock.advance(320);
        assert_eq!(clock.timestamp(), 640);
    }
}
