//! Single-threaded UDP receiver: admits clients, validates provenance,
//! and applies HELO/DATA/KEY-PRESS side effects to the client table.
//!
//! Every malformed, stale, or unprovenanced datagram is a silent drop —
//! logged at most at `trace`, to avoid flooding logs from a hostile or
//! buggy peer. Only a fatal socket error is allowed to bring the process
//! down.

use std::net::{SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use choir_net::packet::{self, ClientData, ClientHelo, KeyPress, ServerHelo, MAX_DATAGRAM_SIZE, PACKET_DATA, PACKET_HELO, PACKET_KEY_PRESS};
use choir_net::pacer::Pacer;
use choir_net::{MONO_BLOCK_SIZE, PROT_VERSION, SAMPLE_RATE};

use crate::client_table::ClientTable;

const SERVER_HELP: &str = "welcome to the choir room";

/// Keys reserved for a future metronome facility: accepted (so replay
/// protection on `last_key_press` still advances) but otherwise inert.
const METRONOME_KEYS: &[u8] = b"mjkhln";

pub struct Receiver {
    socket: Arc<UdpSocket>,
    table: Arc<ClientTable>,
    pacer: Pacer,
    current_block: Arc<AtomicU32>,
}

impl Receiver {
    pub fn new(socket: Arc<UdpSocket>, table: Arc<ClientTable>, pacer: Pacer, current_block: Arc<AtomicU32>) -> Self {
        Self { socket, table, pacer, current_block }
    }

    /// Run until `shutdown` is observed or a fatal socket error occurs.
    /// The socket is expected to have a read timeout set so this loop can
    /// periodically recheck `shutdown` even with no traffic.
    pub fn run(&self, shutdown: &AtomicBool) {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        loop {
            if shutdown.load(Ordering::Acquire) {
                return;
            }
            let (len, src) = match self.socket.recv_from(&mut buf) {
                Ok(v) => v,
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => {
                    log::error!("fatal receive error, shutting down: {e}");
                    shutdown.store(true, Ordering::Release);
                    return;
                }
            };
            let addr = match src {
                SocketAddr::V4(v4) => v4,
                SocketAddr::V6(v6) => {
                    log::trace!("dropping datagram from non-IPv4 peer {v6}");
                    continue;
                }
            };
            self.dispatch(&buf[..len], addr);
        }
    }

    fn dispatch(&self, bytes: &[u8], addr: SocketAddrV4) {
        match packet::peek_tag(bytes) {
            Some(PACKET_HELO) => self.handle_helo(bytes, addr),
            Some(PACKET_DATA) => self.handle_data(bytes, addr),
            Some(PACKET_KEY_PRESS) => self.handle_key_press(bytes, addr),
            Some(tag) => log::trace!("dropping datagram with unrecognized tag {tag} from {addr}"),
            None => log::trace!("dropping empty datagram from {addr}"),
        }
    }

    fn handle_helo(&self, bytes: &[u8], addr: SocketAddrV4) {
        let helo = match ClientHelo::decode(bytes) {
            Ok(h) => h,
            Err(e) => {
                log::trace!("malformed HELO from {addr}: {e}");
                return;
            }
        };
        if helo.version != PROT_VERSION {
            log::warn!("refusing HELO from {addr}: unsupported protocol version {}", helo.version);
            return;
        }
        if self.table.find_connected_by_addr(addr).is_some() {
            log::trace!("dropping duplicate HELO from already-connected {addr}");
            return;
        }
        let Some(cell) = self.table.admit(addr) else {
            log::warn!("refusing HELO from {addr}: room is full");
            return;
        };
        cell.set_name(&helo.name);
        cell.set_aio_latency(helo.aio_latency);
        cell.spatial.set_gain_db(helo.db_adj);
        cell.last_packet_usec.store(self.pacer.usec_since_start(), Ordering::Relaxed);
        cell.connected.store(true, Ordering::Release);
        self.table.reinit_spatialization();

        let reply = ServerHelo {
            client_id: cell.id,
            init_block_index: self.current_block.load(Ordering::Relaxed),
            help: SERVER_HELP.to_string(),
        };
        if let Err(e) = self.socket.send_to(&reply.encode(), addr) {
            log::warn!("failed to send ServerHelo to {addr}: {e}");
            cell.connected.store(false, Ordering::Release);
            return;
        }
        log::info!("client {} '{}' connected from {addr}", cell.id, helo.name);
    }

    fn handle_data(&self, bytes: &[u8], addr: SocketAddrV4) {
        let data = match ClientData::decode(bytes) {
            Ok(d) => d,
            Err(e) => {
                log::trace!("malformed DATA from {addr}: {e}");
                return;
            }
        };
        let Some(cell) = self.table.get(data.client_id) else {
            log::trace!("dropping DATA for unknown client {} from {addr}", data.client_id);
            return;
        };
        if !cell.connected.load(Ordering::Acquire) || cell.addr() != addr {
            log::trace!("dropping DATA with mismatched provenance from {addr}");
            return;
        }

        let block_ms = MONO_BLOCK_SIZE as f32 * 1000.0 / SAMPLE_RATE as f32;
        let current = self.current_block.load(Ordering::Relaxed) as i64;
        let server_lag = current - data.play_block_index as i64;
        let client_lag = data.block_index as i64 - cell.buffer.read_pos() as i64;
        cell.set_rest_latency(block_ms * (server_lag + client_lag) as f32);

        cell.buffer.write(data.block_index, &data.block);
        cell.last_packet_usec.store(self.pacer.usec_since_start(), Ordering::Relaxed);
    }

    fn handle_key_press(&self, bytes: &[u8], addr: SocketAddrV4) {
        let kp = match KeyPress::decode(bytes) {
            Ok(k) => k,
            Err(e) => {
                log::trace!("malformed KEY-PRESS from {addr}: {e}");
                return;
            }
        };
        let Some(cell) = self.table.get(kp.client_id) else {
            log::trace!("dropping KEY-PRESS for unknown client {} from {addr}", kp.client_id);
            return;
        };
        if !cell.connected.load(Ordering::Acquire) || cell.addr() != addr {
            log::trace!("dropping KEY-PRESS with mismatched provenance from {addr}");
            return;
        }
        if kp.play_block_index <= cell.last_key_press.load(Ordering::Relaxed) {
            log::trace!("dropping stale/replayed KEY-PRESS from {addr}");
            return;
        }
        cell.last_key_press.store(kp.play_block_index, Ordering::Relaxed);

        match kp.key {
            b'u' => {
                self.table.move_up(kp.client_id);
                self.table.reinit_spatialization();
            }
            b'd' => {
                self.table.move_down(kp.client_id);
                self.table.reinit_spatialization();
            }
            key if METRONOME_KEYS.contains(&key) => {
                log::debug!("metronome key '{}' from client {} accepted, no effect", key as char, kp.client_id);
            }
            key => {
                log::trace!("ignoring unrecognized key '{}' from client {}", key as char, kp.client_id);
            }
        }
    }
}
