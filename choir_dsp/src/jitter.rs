//! Lock-free single-writer/single-reader jitter buffer keyed by block
//! index, so out-of-order or dropped datagrams degrade gracefully to
//! silence rather than blocking the mixer.
//!
//! Generalizes the triple-buffer publish/consume discipline (an atomic
//! tag gates visibility of a slot's contents) from three fixed slots to
//! a depth-`N` ring addressed by `block_index mod depth`, because the
//! receiver needs keyed random-access writes rather than a sequential
//! push/pop stream.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};

use choir_net::{BlockIndex, Sample, MONO_BLOCK_SIZE};

/// Ring depth. Covers several block periods of reorder/jitter tolerance
/// without growing memory per client.
const DEPTH: usize = 8;

/// Smoothing factor for the running average level (per block).
const AVG_DECAY: f32 = 0.9;
/// Decay factor for the peak level (per block).
const PEAK_DECAY: f32 = 0.99;

/// A block-indexed ring of mono audio, written by exactly one thread
/// (the UDP receiver) and read by exactly one other (the mixer).
pub struct JitterBuffer {
    slots: [UnsafeCell<[Sample; MONO_BLOCK_SIZE]>; DEPTH],
    /// 0 means empty; otherwise holds `block_index + 1` of the block
    /// currently resident in the matching slot.
    tags: [AtomicU32; DEPTH],
    /// Mixer-only: next block index to read. Not touched by the writer.
    read_cursor: UnsafeCell<BlockIndex>,
    avg_level_bits: AtomicU32,
    peak_level_bits: AtomicU32,
}

// SAFETY: `slots` and `read_cursor` are each touched by exactly one of
// the two threads that hold a reference to this buffer (receiver writes
// slots, mixer reads slots and owns read_cursor exclusively); `tags` is
// the release/acquire gate that makes a written slot's contents visible
// to the reader before it trusts the tag match.
unsafe impl Send for JitterBuffer {}
unsafe impl Sync for JitterBuffer {}

impl JitterBuffer {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| UnsafeCell::new([0.0; MONO_BLOCK_SIZE])),
            tags: std::array::from_fn(|_| AtomicU32::new(0)),
            read_cursor: UnsafeCell::new(0),
            avg_level_bits: AtomicU32::new(0f32.to_bits()),
            peak_level_bits: AtomicU32::new(0f32.to_bits()),
        }
    }

    /// Reset to an empty buffer at read position 0. Called once by the
    /// receiver on admission, before the client is marked connected.
    pub fn reset(&self) {
        for tag in &self.tags {
            tag.store(0, Ordering::Release);
        }
        // SAFETY: called during admission, before the mixer can observe
        // this client as connected, so there is no concurrent reader yet.
        unsafe {
            *self.read_cursor.get() = 0;
        }
        self.avg_level_bits.store(0f32.to_bits(), Ordering::Relaxed);
        self.peak_level_bits.store(0f32.to_bits(), Ordering::Relaxed);
    }

    /// Writer side: store a block at its nominal index. Called only from
    /// the receiver thread.
    pub fn write(&self, block_index: BlockIndex, data: &[Sample; MONO_BLOCK_SIZE]) {
        let slot = (block_index as usize) % DEPTH;
        // Invalidate before overwriting so a concurrent reader never sees
        // a torn slot under a stale-matching tag.
        self.tags[slot].store(0, Ordering::Release);
        // SAFETY: single writer (receiver thread); the reader only ever
        // dereferences this slot after observing the matching tag below.
        unsafe {
            *self.slots[slot].get() = *data;
        }
        self.tags[slot].store(block_index.wrapping_add(1), Ordering::Release);
    }

    /// Reader side: pull the next expected block, substituting silence on
    /// underrun (never written) or staleness (overwritten by a much later
    /// index). Called only from the mixer thread.
    pub fn read_next(&self) -> [Sample; MONO_BLOCK_SIZE] {
        // SAFETY: single reader (mixer thread) owns read_cursor.
        let cursor = unsafe { *self.read_cursor.get() };
        let slot = (cursor as usize) % DEPTH;
        let tag = self.tags[slot].load(Ordering::Acquire);
        let block = if tag == cursor.wrapping_add(1) {
            // SAFETY: acquire load above synchronizes-with the writer's
            // release store, so the slot's contents are visible here.
            unsafe { *self.slots[slot].get() }
        } else {
            [0.0; MONO_BLOCK_SIZE]
        };
        unsafe {
            *self.read_cursor.get() = cursor.wrapping_add(1);
        }
        self.update_levels(&block);
        block
    }

    /// Next block index this buffer expects to read. Used by the
    /// receiver to estimate round-trip/buffering latency.
    pub fn read_pos(&self) -> BlockIndex {
        // SAFETY: read-only peek from the receiver; a torn read of a u32
        // on all supported targets is not possible, and staleness here is
        // a latency-estimate input, not a correctness-critical value.
        unsafe { *self.read_cursor.get() }
    }

    fn update_levels(&self, block: &[Sample; MONO_BLOCK_SIZE]) {
        let mut peak = 0f32;
        let mut sum = 0f32;
        for &s in block {
            let a = s.abs();
            sum += a;
            if a > peak {
                peak = a;
            }
        }
        let avg = sum / MONO_BLOCK_SIZE as f32;

        let prev_avg = f32::from_bits(self.avg_level_bits.load(Ordering::Relaxed));
        let smoothed = prev_avg * AVG_DECAY + avg * (1.0 - AVG_DECAY);
        self.avg_level_bits.store(smoothed.to_bits(), Ordering::Relaxed);

        let prev_peak = f32::from_bits(self.peak_level_bits.load(Ordering::Relaxed));
        let decayed = (prev_peak * PEAK_DECAY).max(peak);
        self.peak_level_bits.store(decayed.to_bits(), Ordering::Relaxed);
    }

    /// Short-term running average of absolute sample value, for status display.
    pub fn avg_level(&self) -> f32 {
        f32::from_bits(self.avg_level_bits.load(Ordering::Relaxed))
    }

    /// Decaying peak of absolute sample value, for status display.
    pub fn peak_level(&self) -> f32 {
        f32::from_bits(self.peak_level_bits.load(Ordering::Relaxed))
    }
}

impl Default for JitterBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_returns_the_written_block() {
        let buf = JitterBuffer::new();
        let mut block = [0.0; MONO_BLOCK_SIZE];
        block[0] = 0.5;
        buf.write(0, &block);
        assert_eq!(buf.read_next(), block);
    }

    #[test]
    fn underrun_yields_silence() {
        let buf = JitterBuffer::new();
        assert_eq!(buf.read_next(), [0.0; MONO_BLOCK_SIZE]);
    }

    #[test]
    fn stale_slot_yields_silence_not_old_data() {
        let buf = JitterBuffer::new();
        let mut block = [0.0; MONO_BLOCK_SIZE];
        block[0] = 1.0;
        buf.write(0, &block);
        // Skip ahead past this slot's reuse without writing the expected index.
        buf.write((DEPTH as BlockIndex) * 3, &block);
        let mut cursor = 0;
        while cursor < (DEPTH as BlockIndex) * 3 {
            buf.read_next();
            cursor += 1;
        }
        assert_eq!(buf.read_next(), [0.0; MONO_BLOCK_SIZE]);
    }

    #[test]
    fn read_pos_advances_with_each_read() {
        let buf = JitterBuffer::new();
        assert_eq!(buf.read_pos(), 0);
        buf.read_next();
        assert_eq!(buf.read_pos(), 1);
    }

    #[test]
    fn reset_clears_levels_and_cursor() {
        let buf = JitterBuffer::new();
        let block = [1.0; MONO_BLOCK_SIZE];
        buf.write(0, &block);
        buf.read_next();
        assert!(buf.avg_level() > 0.0);
        buf.reset();
        assert_eq!(buf.read_pos(), 0);
        assert_eq!(buf.avg_level(), 0.0);
        assert_eq!(buf.read_next(), [0.0; MONO_BLOCK_SIZE]);
    }
}
