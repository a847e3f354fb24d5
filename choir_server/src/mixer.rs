//! Block-paced mixing loop: pulls a block from every connected client,
//! spatializes and sums once, then ships each client a personalized
//! "everyone but you" mix by subtracting their own contribution back out
//! of the shared sum.
//!
//! Liveness sweeps, the status broadcast, and load reporting are all
//! inlined here at their respective block-count cadences, exactly as the
//! pacer loop they ride on top of.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use choir_net::packet::ServerData;
use choir_net::pacer::Pacer;
use choir_net::{
    BlockIndex, STEREO_BLOCK_SIZE, BLOCKS_PER_LIVENESS_CHECK, BLOCKS_PER_LOAD_REPORT, CLIENT_TIMEOUT_USEC,
    MAX_CLIENTS,
};

use crate::client_table::ClientTable;
use crate::status::StatusBroadcaster;

pub struct Mixer {
    socket: Arc<UdpSocket>,
    table: Arc<ClientTable>,
    pacer: Pacer,
    current_block: Arc<AtomicU32>,
    status: StatusBroadcaster,
}

impl Mixer {
    pub fn new(socket: Arc<UdpSocket>, table: Arc<ClientTable>, pacer: Pacer, current_block: Arc<AtomicU32>) -> Self {
        Self {
            socket,
            table,
            pacer,
            current_block,
            status: StatusBroadcaster::new(),
        }
    }

    /// Run until `shutdown` is observed. Blocks between ticks via
    /// `thread::sleep`; never skips a block index on lateness.
    pub fn run(&mut self, shutdown: &AtomicBool) {
        let mut k: BlockIndex = 0;
        let mut free_usec: i64 = 0;
        // Per-tick scratch: each connected client's spatialized stereo
        // contribution, keyed by slot id, so it can be subtracted back out
        // without re-spatializing. Lives only for the duration of one
        // tick; cleared implicitly by being overwritten, never read stale.
        let mut contributions: [Option<Box<[f32; STEREO_BLOCK_SIZE]>>; MAX_CLIENTS] =
            std::array::from_fn(|_| None);

        while !shutdown.load(Ordering::Acquire) {
            let connected = self.table.connected_by_slot();

            let mut sum = Box::new([0f32; STEREO_BLOCK_SIZE]);
            for &id in &connected {
                let cell = self.table.get(id).expect("connected id names a live slot");
                let mono = cell.buffer.read_next();
                let stereo = cell.spatial.spatialize(&mono);
                for (acc, &s) in sum.iter_mut().zip(stereo.iter()) {
                    *acc += s;
                }
                contributions[id as usize] = Some(stereo);
            }

            for &id in &connected {
                let cell = self.table.get(id).expect("connected id names a live slot");
                let own = contributions[id as usize].take().expect("filled above");
                let mut mix = Box::new([0f32; STEREO_BLOCK_SIZE]);
                for i in 0..STEREO_BLOCK_SIZE {
                    mix[i] = sum[i] - own[i];
                }
                let packet = ServerData { block_index: k, block: mix };
                if let Err(e) = self.socket.send_to(&packet.encode(), cell.addr()) {
                    log::warn!("send failed for client {id}, disconnecting: {e}");
                    cell.connected.store(false, Ordering::Release);
                }
            }

            self.current_block.store(k + 1, Ordering::Relaxed);
            k += 1;

            let wait = self.pacer.usec_until(k);
            if wait > 0 {
                std::thread::sleep(std::time::Duration::from_micros(wait as u64));
                free_usec += wait;
            } else {
                log::warn!("mixer running behind schedule by {} usec at block {k}", -wait);
            }

            if k % BLOCKS_PER_LIVENESS_CHECK == 0 {
                self.check_liveness();
            }
            if k % choir_net::BLOCKS_PER_STAT == 0 {
                self.status.broadcast(&self.socket, &self.table, k);
            }
            if k % BLOCKS_PER_LOAD_REPORT == 0 {
                let period_usec = self.pacer.block_usec(BLOCKS_PER_LOAD_REPORT);
                let load_pct = (1.0 - free_usec as f64 / period_usec as f64) * 100.0;
                log::info!("mixer load: {load_pct:.1}% at block {k}");
                free_usec = 0;
            }
        }
    }

    fn check_liveness(&self) {
        let now = self.pacer.usec_since_start();
        for id in self.table.connected_by_slot() {
            let cell = self.table.get(id).expect("connected id names a live slot");
            let last = cell.last_packet_usec.load(Ordering::Relaxed);
            if now - last > CLIENT_TIMEOUT_USEC {
                cell.connected.store(false, Ordering::Release);
                log::info!("client {id} timed out after {} usec of silence", now - last);
            }
        }
    }
}
