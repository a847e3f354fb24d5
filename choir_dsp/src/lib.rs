//! Per-client audio collaborators for the choir server: a jitter-tolerant
//! block buffer and an equal-power stereo panner.

pub mod jitter;
pub mod spatial;

pub use jitter::JitterBuffer;
pub use spatial::SpatialContext;
