//! End-to-end scenarios driven over real loopback UDP sockets: each test
//! stands up one `Room`, talks to it as one or more singers would, and
//! checks the externally observable behavior the room promises.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use choir_net::packet::{ClientData, ClientHelo, KeyPress, ServerData, ServerHelo, MAX_DATAGRAM_SIZE};
use choir_net::{BlockIndex, MONO_BLOCK_SIZE, PROT_VERSION};
use choir_server::Room;

fn bind_room() -> (Room, SocketAddr) {
    let socket = UdpSocket::bind("127.0.0.1:0").expect("bind server socket");
    socket.set_read_timeout(Some(Duration::from_millis(20))).unwrap();
    let addr = socket.local_addr().unwrap();
    (Room::new(socket), addr)
}

fn connect_client(server_addr: SocketAddr, name: &str) -> (UdpSocket, u8, BlockIndex) {
    let sock = UdpSocket::bind("127.0.0.1:0").expect("bind client socket");
    sock.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
    let helo = ClientHelo { version: PROT_VERSION, aio_latency: 5.0, db_adj: 0.0, name: name.to_string() };
    sock.send_to(&helo.encode(), server_addr).unwrap();
    let mut buf = [0u8; MAX_DATAGRAM_SIZE];
    let (len, _) = sock.recv_from(&mut buf).expect("server helo reply");
    let reply = ServerHelo::decode(&buf[..len]).unwrap();
    (sock, reply.client_id, reply.init_block_index)
}

#[test]
fn s1_single_client_hears_only_silence() {
    let (room, server_addr) = bind_room();
    let shutdown = Arc::new(AtomicBool::new(false));

    thread::scope(|scope| {
        let shutdown_run = Arc::clone(&shutdown);
        scope.spawn(|| {
            let recv_handle = room.run(shutdown_run);
            recv_handle.join().unwrap();
        });
        thread::sleep(Duration::from_millis(50));

        let (sock, id, _init_block) = connect_client(server_addr, "solo");
        assert!(room.table.get(id).unwrap().connected.load(Ordering::Acquire));

        for i in 0..30u32 {
            let data = ClientData {
                client_id: id,
                block_index: i,
                play_block_index: 0,
                block: [0.0; MONO_BLOCK_SIZE],
            };
            sock.send_to(&data.encode(), server_addr).unwrap();
            thread::sleep(Duration::from_millis(2));
        }

        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let mut saw_any = false;
        while let Ok((len, _)) = sock.recv_from(&mut buf) {
            let sd = ServerData::decode(&buf[..len]).unwrap();
            assert!(sd.block.iter().all(|&s| s == 0.0), "a lone singer must only ever hear silence back");
            saw_any = true;
        }
        assert!(saw_any, "expected at least one ServerData reply");

        shutdown.store(true, Ordering::Release);
    });
}

#[test]
fn s2_each_client_hears_everyone_but_themself() {
    let (room, server_addr) = bind_room();
    let shutdown = Arc::new(AtomicBool::new(false));

    thread::scope(|scope| {
        let shutdown_run = Arc::clone(&shutdown);
        scope.spawn(|| {
            let recv_handle = room.run(shutdown_run);
            recv_handle.join().unwrap();
        });
        thread::sleep(Duration::from_millis(50));

        let (sock_a, id_a, _) = connect_client(server_addr, "alpha");
        let (sock_b, id_b, _) = connect_client(server_addr, "beta");

        let mut pulse = [0.0f32; MONO_BLOCK_SIZE];
        pulse[0] = 1.0;
        let silence = [0.0f32; MONO_BLOCK_SIZE];

        for i in 0..40u32 {
            let a_data = ClientData { client_id: id_a, block_index: i, play_block_index: 0, block: pulse };
            sock_a.send_to(&a_data.encode(), server_addr).unwrap();
            let b_data = ClientData { client_id: id_b, block_index: i, play_block_index: 0, block: silence };
            sock_b.send_to(&b_data.encode(), server_addr).unwrap();
            thread::sleep(Duration::from_millis(2));
        }

        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let mut b_heard_a = false;
        while let Ok((len, _)) = sock_b.recv_from(&mut buf) {
            let sd = ServerData::decode(&buf[..len]).unwrap();
            if sd.block.iter().any(|&s| s.abs() > 0.01) {
                b_heard_a = true;
            }
        }
        let mut a_heard_only_silence = true;
        while let Ok((len, _)) = sock_a.recv_from(&mut buf) {
            let sd = ServerData::decode(&buf[..len]).unwrap();
            if sd.block.iter().any(|&s| s.abs() > 0.01) {
                a_heard_only_silence = false;
            }
        }

        assert!(b_heard_a, "beta's mix must contain alpha's pulse");
        assert!(a_heard_only_silence, "alpha must not hear its own pulse reflected back");

        shutdown.store(true, Ordering::Release);
    });
}

#[test]
fn s3_reorder_key_press_updates_render_order() {
    let (room, server_addr) = bind_room();
    let shutdown = Arc::new(AtomicBool::new(false));

    thread::scope(|scope| {
        let shutdown_run = Arc::clone(&shutdown);
        scope.spawn(|| {
            let recv_handle = room.run(shutdown_run);
            recv_handle.join().unwrap();
        });
        thread::sleep(Duration::from_millis(50));

        let (_sock_a, id_a, _) = connect_client(server_addr, "alpha");
        let (_sock_b, id_b, _) = connect_client(server_addr, "beta");
        let (sock_c, id_c, _) = connect_client(server_addr, "gamma");
        thread::sleep(Duration::from_millis(50));

        assert_eq!(room.table.connected_in_order().as_slice(), &[id_a, id_b, id_c]);

        let kp = KeyPress { client_id: id_c, play_block_index: 100, key: b'u' };
        sock_c.send_to(&kp.encode(), server_addr).unwrap();
        thread::sleep(Duration::from_millis(50));

        assert_eq!(room.table.connected_in_order().as_slice(), &[id_a, id_c, id_b]);

        shutdown.store(true, Ordering::Release);
    });
}

#[test]
fn s4_stale_key_press_is_dropped() {
    let (room, server_addr) = bind_room();
    let shutdown = Arc::new(AtomicBool::new(false));

    thread::scope(|scope| {
        let shutdown_run = Arc::clone(&shutdown);
        scope.spawn(|| {
            let recv_handle = room.run(shutdown_run);
            recv_handle.join().unwrap();
        });
        thread::sleep(Duration::from_millis(50));

        let (_sock_a, id_a, _) = connect_client(server_addr, "alpha");
        let (_sock_b, id_b, _) = connect_client(server_addr, "beta");
        let (sock_c, id_c, _) = connect_client(server_addr, "gamma");
        thread::sleep(Duration::from_millis(50));

        let kp_first = KeyPress { client_id: id_c, play_block_index: 100, key: b'u' };
        sock_c.send_to(&kp_first.encode(), server_addr).unwrap();
        thread::sleep(Duration::from_millis(50));
        let after_first = room.table.connected_in_order();
        assert_eq!(after_first.as_slice(), &[id_a, id_c, id_b]);

        // Same play_block_index, different direction: must be dropped as a replay.
        let kp_replay = KeyPress { client_id: id_c, play_block_index: 100, key: b'd' };
        sock_c.send_to(&kp_replay.encode(), server_addr).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(room.table.connected_in_order().as_slice(), after_first.as_slice());

        shutdown.store(true, Ordering::Release);
    });
}

#[test]
fn s5_inactive_client_is_disconnected_after_timeout() {
    let (room, server_addr) = bind_room();
    let shutdown = Arc::new(AtomicBool::new(false));

    thread::scope(|scope| {
        let shutdown_run = Arc::clone(&shutdown);
        scope.spawn(|| {
            let recv_handle = room.run(shutdown_run);
            recv_handle.join().unwrap();
        });
        thread::sleep(Duration::from_millis(50));

        let (_sock, id, _) = connect_client(server_addr, "idle");
        assert!(room.table.get(id).unwrap().connected.load(Ordering::Acquire));

        thread::sleep(Duration::from_millis(1300));
        assert!(
            !room.table.get(id).unwrap().connected.load(Ordering::Acquire),
            "a client silent for over a second must be marked disconnected"
        );

        shutdown.store(true, Ordering::Release);
    });
}

#[test]
fn s6_version_mismatch_is_refused_without_reply() {
    let (room, server_addr) = bind_room();
    let shutdown = Arc::new(AtomicBool::new(false));

    thread::scope(|scope| {
        let shutdown_run = Arc::clone(&shutdown);
        scope.spawn(|| {
            let recv_handle = room.run(shutdown_run);
            recv_handle.join().unwrap();
        });
        thread::sleep(Duration::from_millis(50));

        let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
        sock.set_read_timeout(Some(Duration::from_millis(150))).unwrap();
        let helo = ClientHelo {
            version: PROT_VERSION + 1,
            aio_latency: 0.0,
            db_adj: 0.0,
            name: "impostor".to_string(),
        };
        sock.send_to(&helo.encode(), server_addr).unwrap();

        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        assert!(sock.recv_from(&mut buf).is_err(), "must not reply to a version-mismatched HELO");
        assert!(room.table.connected_in_order().is_empty());

        shutdown.store(true, Ordering::Release);
    });
}
