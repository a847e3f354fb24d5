//! Virtual choir rehearsal room server entry point: binds the UDP
//! socket, then runs the receiver and mixer until a fatal error signals
//! shutdown.

use std::net::UdpSocket;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use choir_net::UDP_PORT;
use choir_server::Room;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let socket = UdpSocket::bind(("0.0.0.0", UDP_PORT))
        .with_context(|| format!("binding UDP socket on port {UDP_PORT}"))?;
    socket
        .set_read_timeout(Some(Duration::from_millis(200)))
        .context("setting receiver read timeout")?;

    log::info!("choir server listening on port {UDP_PORT}");

    let room = Room::new(socket);
    let shutdown = Arc::new(AtomicBool::new(false));
    let receiver_thread = room.run(shutdown);
    receiver_thread.join().expect("receiver thread panicked");
    Ok(())
}
