//! Wire-level building blocks shared by the choir server: block-grid
//! constants, a monotonic pacer, and the datagram packet codec.

pub mod packet;
pub mod pacer;

/// A single audio sample. The mix path never clips; downstream consumers
/// are responsible for headroom.
pub type Sample = f32;

/// A block-grid tick counter. Wraps after ~3 years of uptime at 128
/// samples / 48kHz; ample for this service's expected lifetime.
pub type BlockIndex = u32;

/// Samples per mono block pulled from (or pushed to) a single client.
pub const MONO_BLOCK_SIZE: usize = 128;

/// Samples per stereo block sent back to a client (interleaved L/R).
pub const STEREO_BLOCK_SIZE: usize = MONO_BLOCK_SIZE * 2;

/// Server sample rate. Dynamic sample-rate adaptation is out of scope.
pub const SAMPLE_RATE: u32 = 48_000;

/// Upper bound on simultaneously connected singers.
pub const MAX_CLIENTS: usize = 32;

/// Max bytes (including the NUL terminator) for a client display name.
pub const NAME_LEN: usize = 32;

/// Max bytes (including the NUL terminator) for the server HELO help string.
pub const SHELO_STR_LEN: usize = 64;

/// Wire protocol version. A HELO declaring any other value is refused.
pub const PROT_VERSION: u8 = 1;

/// UDP port the server binds.
pub const UDP_PORT: u16 = 7812;

/// Status lines per STATUS datagram page (border lines included).
pub const STATUS_LINES_PER_PACKET: usize = 16;

/// Mixer ticks between status broadcast cycles.
pub const BLOCKS_PER_STAT: u32 = 40;

/// Mixer ticks between liveness sweeps.
pub const BLOCKS_PER_LIVENESS_CHECK: u32 = 50;

/// Mixer ticks between load-percentage log lines.
pub const BLOCKS_PER_LOAD_REPORT: u32 = 1000;

/// Client inactivity timeout, in microseconds.
pub const CLIENT_TIMEOUT_USEC: i64 = 1_000_000;
