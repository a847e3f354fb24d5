//! Client session table: a fixed-capacity slot array with stable ids,
//! plus an independent render-order vector used for stereo panorama
//! layout and status-page ordering.
//!
//! Admission, reordering, and spatialization reinit are only ever
//! invoked from the receiver thread, so those operations need no
//! internal synchronization of their own; what does need care is making
//! their results visible to the mixer thread (see module docs on
//! `ClientCell`).

use std::f32::consts::PI;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::OnceLock;

use arrayvec::ArrayVec;
use parking_lot::Mutex;

use choir_dsp::{JitterBuffer, SpatialContext};
use choir_net::{BlockIndex, MAX_CLIENTS};

/// Default spread for newly admitted clients: fully panned.
const DEFAULT_SPREAD: f32 = 0.0;

/// A `SocketAddrV4` packed into a single `AtomicU64`, so the mixer thread
/// can read a client's send address every tick without a lock. Writes
/// only ever happen on the receiver thread, at admission.
struct AtomicAddr {
    bits: AtomicU64,
}

impl AtomicAddr {
    fn new(addr: SocketAddrV4) -> Self {
        Self { bits: AtomicU64::new(Self::encode(addr)) }
    }

    fn encode(addr: SocketAddrV4) -> u64 {
        let ip = u32::from(*addr.ip()) as u64;
        let port = addr.port() as u64;
        (ip << 16) | port
    }

    fn decode(bits: u64) -> SocketAddrV4 {
        let ip = Ipv4Addr::from(((bits >> 16) & 0xFFFF_FFFF) as u32);
        let port = (bits & 0xFFFF) as u16;
        SocketAddrV4::new(ip, port)
    }

    fn store(&self, addr: SocketAddrV4) {
        self.bits.store(Self::encode(addr), Ordering::Release);
    }

    fn load(&self) -> SocketAddrV4 {
        Self::decode(self.bits.load(Ordering::Acquire))
    }
}

/// Per-client state shared between the receiver and mixer threads.
///
/// `connected` is the publication flag: release-stored whenever the
/// receiver finishes admitting a client or whenever either thread tears
/// one down, acquire-loaded before either thread trusts the rest of the
/// cell's contents. `addr` follows the same discipline via `AtomicAddr`.
/// `name`/`aio_latency` are touched only at admission (write) and status
/// broadcast time (read) — genuinely off the per-tick hot path — so they
/// use a conventional lock and a relaxed-ordering float cell respectively
/// rather than anything lock-free.
pub struct ClientCell {
    pub id: u8,
    pub connected: AtomicBool,
    addr: AtomicAddr,
    name: Mutex<String>,
    aio_latency_bits: AtomicU32,
    rest_latency_bits: AtomicU32,
    pub last_packet_usec: AtomicI64,
    pub last_key_press: AtomicU32,
    pub spatial: SpatialContext,
    pub buffer: JitterBuffer,
}

impl ClientCell {
    fn new(id: u8, addr: SocketAddrV4) -> Self {
        Self {
            id,
            connected: AtomicBool::new(false),
            addr: AtomicAddr::new(addr),
            name: Mutex::new(String::new()),
            aio_latency_bits: AtomicU32::new(0f32.to_bits()),
            rest_latency_bits: AtomicU32::new(0f32.to_bits()),
            last_packet_usec: AtomicI64::new(0),
            last_key_press: AtomicU32::new(0),
            spatial: SpatialContext::new(0.0, DEFAULT_SPREAD),
            buffer: JitterBuffer::new(),
        }
    }

    pub fn addr(&self) -> SocketAddrV4 {
        self.addr.load()
    }

    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub fn set_name(&self, name: &str) {
        *self.name.lock() = name.to_string();
    }

    pub fn aio_latency(&self) -> f32 {
        f32::from_bits(self.aio_latency_bits.load(Ordering::Relaxed))
    }

    pub fn set_aio_latency(&self, ms: f32) {
        self.aio_latency_bits.store(ms.to_bits(), Ordering::Relaxed);
    }

    pub fn rest_latency(&self) -> f32 {
        f32::from_bits(self.rest_latency_bits.load(Ordering::Relaxed))
    }

    pub fn set_rest_latency(&self, ms: f32) {
        self.rest_latency_bits.store(ms.to_bits(), Ordering::Relaxed);
    }

    fn reactivate(&self, addr: SocketAddrV4) {
        self.buffer.reset();
        self.addr.store(addr);
        self.set_name("");
        self.set_aio_latency(0.0);
        self.set_rest_latency(0.0);
        self.last_key_press.store(0, Ordering::Relaxed);
        self.spatial.set_azimuth(0.0);
        self.spatial.set_gain_db(0.0);
    }
}

/// Fixed-capacity room membership plus render order.
pub struct ClientTable {
    slots: [OnceLock<Box<ClientCell>>; MAX_CLIENTS],
    order: Mutex<ArrayVec<u8, MAX_CLIENTS>>,
}

impl ClientTable {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| OnceLock::new()),
            order: Mutex::new(ArrayVec::new()),
        }
    }

    pub fn get(&self, id: u8) -> Option<&ClientCell> {
        self.slots.get(id as usize).and_then(|s| s.get()).map(|b| b.as_ref())
    }

    fn is_connected(&self, id: u8) -> bool {
        self.get(id).map(|c| c.connected.load(Ordering::Acquire)).unwrap_or(false)
    }

    /// Room membership lookup for the receiver's duplicate-HELO check.
    pub fn find_connected_by_addr(&self, addr: SocketAddrV4) -> Option<u8> {
        (0..MAX_CLIENTS as u8).find(|&id| self.is_connected(id) && self.get(id).unwrap().addr() == addr)
    }

    /// Admit a new connection at `addr`, reusing a never-used or
    /// disconnected slot. Returns `None` if the room is full. The caller
    /// (the receiver) still owns populating fields and flipping
    /// `connected` once initialization completes.
    pub fn admit(&self, addr: SocketAddrV4) -> Option<&ClientCell> {
        for i in 0..MAX_CLIENTS {
            if self.slots[i].get().is_none() {
                let cell = Box::new(ClientCell::new(i as u8, addr));
                // Only the receiver thread ever calls admit, so this can
                // never race with another `set`.
                let _ = self.slots[i].set(cell);
                self.insert_into_order(i as u8);
                return self.slots[i].get().map(|b| b.as_ref());
            }
            if !self.is_connected(i as u8) {
                let cell = self.get(i as u8).unwrap();
                cell.reactivate(addr);
                self.insert_into_order(i as u8);
                return Some(cell);
            }
        }
        None
    }

    fn insert_into_order(&self, id: u8) {
        let mut order = self.order.lock();
        order.retain(|&x| x != id);
        order.push(id);
    }

    /// Swap `id` with its nearest connected predecessor in render order.
    /// No-op if `id` is already first among connected entries.
    pub fn move_up(&self, id: u8) {
        let mut order = self.order.lock();
        if let Some(pos) = order.iter().position(|&x| x == id) {
            let mut j = pos;
            while j > 0 {
                j -= 1;
                if self.is_connected(order[j]) {
                    order.swap(j, pos);
                    return;
                }
            }
        }
    }

    /// Swap `id` with its nearest connected successor in render order.
    /// No-op if `id` is already last among connected entries.
    pub fn move_down(&self, id: u8) {
        let mut order = self.order.lock();
        if let Some(pos) = order.iter().position(|&x| x == id) {
            let mut j = pos;
            while j + 1 < order.len() {
                j += 1;
                if self.is_connected(order[j]) {
                    order.swap(pos, j);
                    return;
                }
            }
        }
    }

    /// Recompute and publish equal-spacing azimuths for every connected
    /// client, in render order. A lone connected client centers at 0 to
    /// avoid dividing by zero.
    pub fn reinit_spatialization(&self) {
        let connected = self.connected_in_order();
        let n = connected.len();
        for (i, &id) in connected.iter().enumerate() {
            let azimuth = if n <= 1 {
                0.0
            } else {
                PI * (i as f32 / (n - 1) as f32 - 0.5)
            };
            if let Some(cell) = self.get(id) {
                cell.spatial.set_azimuth(azimuth);
            }
        }
    }

    /// Connected clients in render order, for panning and status layout.
    pub fn connected_in_order(&self) -> ArrayVec<u8, MAX_CLIENTS> {
        let order = self.order.lock();
        order.iter().copied().filter(|&id| self.is_connected(id)).collect()
    }

    /// Connected clients in slot order, for the mixing loop.
    pub fn connected_by_slot(&self) -> ArrayVec<u8, MAX_CLIENTS> {
        (0..MAX_CLIENTS as u8).filter(|&id| self.is_connected(id)).collect()
    }
}

impl Default for ClientTable {
    fn default() -> Self {
        Self::new()
    }
}
