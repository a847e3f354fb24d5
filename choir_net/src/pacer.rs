//! Monotonic wall-clock pacing for the block-grid mixing loop.
//!
//! Grounded on `getUsec`/`getBlockUsec` from the historical C
//! implementation: an `Instant` anchor captured once at startup, integer
//! microsecond arithmetic throughout, never wall-clock time.

use std::time::Instant;

use crate::{BlockIndex, MONO_BLOCK_SIZE, SAMPLE_RATE};

/// Anchors the block grid to a single `Instant` captured at server start.
#[derive(Debug, Clone, Copy)]
pub struct Pacer {
    anchor: Instant,
}

impl Pacer {
    /// Capture the anchor instant. Call this exactly once, at startup.
    pub fn start() -> Self {
        Self {
            anchor: Instant::now(),
        }
    }

    /// Microseconds elapsed since the anchor, as a monotonic integer.
    pub fn usec_since_start(&self) -> i64 {
        self.anchor.elapsed().as_micros() as i64
    }

    /// Nominal start time, in microseconds since the anchor, of block `k`.
    pub fn block_usec(&self, k: BlockIndex) -> i64 {
        (k as i64) * 1_000_000 * (MONO_BLOCK_SIZE as i64) / (SAMPLE_RATE as i64)
    }

    /// Microseconds remaining until block `k` should start (may be negative
    /// if the mixer is running late).
    pub fn usec_until(&self, k: BlockIndex) -> i64 {
        self.block_usec(k) - self.usec_since_start()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_usec_is_linear_and_nonnegative() {
        let pacer = Pacer::start();
        assert_eq!(pacer.block_usec(0), 0);
        let one = pacer.block_usec(1);
        let two = pacer.block_usec(2);
        assert!(one > 0);
        assert_eq!(two, one * 2);
    }

    #[test]
    fn usec_since_start_is_monotonic() {
        let pacer = Pacer::start();
        let a = pacer.usec_since_start();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = pacer.usec_since_start();
        assert!(b >= a);
    }
}
