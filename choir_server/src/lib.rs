//! Virtual choir rehearsal room server: client table, UDP receiver,
//! block-paced mixer, and paginated status broadcaster.

pub mod client_table;
pub mod mixer;
pub mod receiver;
pub mod status;

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, AtomicU32};
use std::sync::Arc;

use choir_net::pacer::Pacer;

use client_table::ClientTable;
use mixer::Mixer;
use receiver::Receiver;

/// Everything needed to run one instance of the room: bind a socket
/// beforehand (so callers, including tests, control the port and any
/// timeouts), then hand it here.
pub struct Room {
    pub table: Arc<ClientTable>,
    socket: Arc<UdpSocket>,
    pacer: Pacer,
    current_block: Arc<AtomicU32>,
}

impl Room {
    pub fn new(socket: UdpSocket) -> Self {
        Self {
            table: Arc::new(ClientTable::new()),
            socket: Arc::new(socket),
            pacer: Pacer::start(),
            current_block: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Spawn the receiver thread and run the mixer loop on the calling
    /// thread until `shutdown` is observed.
    pub fn run(&self, shutdown: Arc<AtomicBool>) -> std::thread::JoinHandle<()> {
        let receiver = Receiver::new(
            Arc::clone(&self.socket),
            Arc::clone(&self.table),
            self.pacer,
            Arc::clone(&self.current_block),
        );
        let receiver_shutdown = Arc::clone(&shutdown);
        let receiver_thread = std::thread::Builder::new()
            .name("choir-receiver".into())
            .spawn(move || receiver.run(&receiver_shutdown))
            .expect("spawning receiver thread");

        let mut mixer = Mixer::new(
            Arc::clone(&self.socket),
            Arc::clone(&self.table),
            self.pacer,
            Arc::clone(&self.current_block),
        );
        mixer.run(&shutdown);

        receiver_thread
    }
}
