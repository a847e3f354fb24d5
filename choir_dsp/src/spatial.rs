//! Equal-power mono-to-stereo panner.
//!
//! Azimuth is republished with relaxed atomics from the receiver thread
//! whenever `reinit_spatialization` reorders the room; the mixer reads it
//! once per block. A torn read across a single block boundary mixes with
//! the previous or next tick's azimuth rather than a corrupted value, and
//! self-corrects on the following tick, so no stronger ordering is needed
//! here.

use std::f32::consts::{FRAC_PI_2, PI};
use std::sync::atomic::{AtomicU32, Ordering};

use choir_net::{Sample, MONO_BLOCK_SIZE, STEREO_BLOCK_SIZE};

/// Per-client pan/gain/spread state, shared between the receiver (writer
/// of azimuth) and the mixer (reader of everything, writer of nothing).
pub struct SpatialContext {
    azimuth_bits: AtomicU32,
    db_adj_bits: AtomicU32,
    spread: f32,
}

impl SpatialContext {
    /// `db_adj` is the client-advertised gain offset; `spread` blends
    /// between a fully panned image (0.0) and an equally duplicated,
    /// center-weighted image (1.0).
    pub fn new(db_adj: f32, spread: f32) -> Self {
        Self {
            azimuth_bits: AtomicU32::new(0f32.to_bits()),
            db_adj_bits: AtomicU32::new(db_adj.to_bits()),
            spread,
        }
    }

    pub fn set_azimuth(&self, azimuth: f32) {
        self.azimuth_bits.store(azimuth.to_bits(), Ordering::Relaxed);
    }

    pub fn azimuth(&self) -> f32 {
        f32::from_bits(self.azimuth_bits.load(Ordering::Relaxed))
    }

    /// Re-advertise the gain offset, e.g. when a slot is reused by a new
    /// connection after its previous occupant disconnected.
    pub fn set_gain_db(&self, db_adj: f32) {
        self.db_adj_bits.store(db_adj.to_bits(), Ordering::Relaxed);
    }

    pub fn gain_db(&self) -> f32 {
        f32::from_bits(self.db_adj_bits.load(Ordering::Relaxed))
    }

    /// Spatialize one mono block into a freshly allocated stereo block.
    pub fn spatialize(&self, mono: &[Sample; MONO_BLOCK_SIZE]) -> Box<[Sample; STEREO_BLOCK_SIZE]> {
        let theta = self.azimuth().clamp(-FRAC_PI_2, FRAC_PI_2);
        let pan = (theta + FRAC_PI_2) / PI * FRAC_PI_2;
        let left_gain = pan.cos() * (1.0 - self.spread) + self.spread;
        let right_gain = pan.sin() * (1.0 - self.spread) + self.spread;
        let gain = 10f32.powf(self.gain_db() / 20.0);

        let mut out = Box::new([0.0; STEREO_BLOCK_SIZE]);
        for (i, &s) in mono.iter().enumerate() {
            out[i * 2] = gain * left_gain * s;
            out[i * 2 + 1] = gain * right_gain * s;
        }
        out
    }
}
