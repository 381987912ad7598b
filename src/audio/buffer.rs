//! Elastic audio buffer
//!
//! A byte-oriented FIFO that decouples irregular transport arrival from the
//! call engine's fixed output cadence. Appended at the tail by the delivery
//! context, drained from the head by the pacing context; an internal lock
//! guards every append/drain pair.
//!
//! The buffer is unbounded: if the producer permanently outpaces the
//! consumer it grows without limit. That risk is monitored rather than
//! bounded: dropping oldest bytes would break the in-order relay guarantee
//! and there is no backpressure path to the pusher. A warning is logged the
//! first time the backlog crosses the soft watermark.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;

use crate::constants::BUFFER_WARN_BYTES;
use crate::error::AudioError;

struct Inner {
    queue: VecDeque<u8>,
    appended: u64,
    drained: u64,
    warned: bool,
}

/// Unbounded FIFO byte queue with immediate and timed drain variants
pub struct ElasticBuffer {
    inner: Mutex<Inner>,
    data_ready: Condvar,
    warn_bytes: usize,
}

impl ElasticBuffer {
    pub fn new() -> Self {
        Self::with_watermark(BUFFER_WARN_BYTES)
    }

    /// Create a buffer with a custom backlog warning watermark
    pub fn with_watermark(warn_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                appended: 0,
                drained: 0,
                warned: false,
            }),
            data_ready: Condvar::new(),
            warn_bytes,
        }
    }

    /// Append bytes at the tail
    ///
    /// Never fails short of allocation exhaustion. Wakes a waiting timed
    /// drain.
    pub fn append(&self, data: &[u8]) {
        let mut inner = self.inner.lock();
        inner.queue.extend(data.iter().copied());
        inner.appended += data.len() as u64;

        if inner.queue.len() > self.warn_bytes && !inner.warned {
            inner.warned = true;
            tracing::warn!(
                backlog = inner.queue.len(),
                watermark = self.warn_bytes,
                "elastic buffer backlog exceeds watermark"
            );
        } else if inner.queue.len() <= self.warn_bytes / 2 {
            inner.warned = false;
        }

        drop(inner);
        self.data_ready.notify_one();
    }

    /// Current byte count
    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain exactly `out.len()` bytes from the head, without waiting
    ///
    /// Returns `NotEnoughData` and leaves the buffer untouched when fewer
    /// bytes are buffered.
    pub fn drain_exact(&self, out: &mut [u8]) -> Result<(), AudioError> {
        let mut inner = self.inner.lock();
        Self::take(&mut inner, out)
    }

    /// Drain exactly `out.len()` bytes, waiting up to `timeout` for them
    ///
    /// Returns `NotEnoughData` once the timeout elapses with the buffer
    /// still short; never blocks past the timeout.
    pub fn drain_timed(&self, out: &mut [u8], timeout: Duration) -> Result<(), AudioError> {
        let mut inner = self.inner.lock();

        if inner.queue.len() < out.len() {
            let deadline = std::time::Instant::now() + timeout;
            while inner.queue.len() < out.len() {
                if self.data_ready.wait_until(&mut inner, deadline).timed_out() {
                    break;
                }
            }
        }

        Self::take(&mut inner, out)
    }

    /// Drain whatever is buffered, up to `out.len()` bytes; returns the
    /// number of bytes copied
    pub fn drain_available(&self, out: &mut [u8]) -> usize {
        let mut inner = self.inner.lock();
        let n = inner.queue.len().min(out.len());
        for b in out[..n].iter_mut() {
            *b = inner.queue.pop_front().unwrap_or(0);
        }
        inner.drained += n as u64;
        n
    }

    /// Total bytes appended over the buffer's lifetime
    pub fn total_appended(&self) -> u64 {
        self.inner.lock().appended
    }

    /// Total bytes drained over the buffer's lifetime
    pub fn total_drained(&self) -> u64 {
        self.inner.lock().drained
    }

    fn take(inner: &mut Inner, out: &mut [u8]) -> Result<(), AudioError> {
        if inner.queue.len() < out.len() {
            return Err(AudioError::NotEnoughData {
                have: inner.queue.len(),
                need: out.len(),
            });
        }

        for b in out.iter_mut() {
            // Length was checked above.
            *b = inner.queue.pop_front().unwrap();
        }
        inner.drained += out.len() as u64;
        Ok(())
    }
}

impl Default for ElasticBuffer {
    fn default() -> Self {
        Self::new()
    }
}
