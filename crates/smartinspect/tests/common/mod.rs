// Copyright 2025-Present the smartinspect-rs authors
// SPDX-License-Identifier: Apache-2.0

//! Minimal console stand-in for integration tests: speaks the banner
//! handshake, acks every frame, and records decoded packets.

use smartinspect::packet::{Packet, PacketBody};
use smartinspect::wire;
use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const BANNER: &[u8] = b"SmartInspect Console v1.0\n";
const POLL: Duration = Duration::from_millis(10);

#[derive(Default)]
struct Shared {
    packets: Mutex<Vec<Packet>>,
    log_headers: Mutex<Vec<String>>,
    // TCP accepts, including ones dropped in refuse mode
    accepts: AtomicUsize,
    // connections that completed the handshake
    handshakes: AtomicUsize,
    refuse: AtomicBool,
    stop: AtomicBool,
}

pub struct MockConsole {
    addr: SocketAddr,
    shared: Arc<Shared>,
}

impl MockConsole {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock console");
        let addr = listener.local_addr().expect("local addr");
        listener
            .set_nonblocking(true)
            .expect("nonblocking listener");

        let shared = Arc::new(Shared::default());
        let accept_shared = shared.clone();
        thread::spawn(move || loop {
            if accept_shared.stop.load(Ordering::Relaxed) {
                break;
            }
            match listener.accept() {
                Ok((stream, _)) => {
                    accept_shared.accepts.fetch_add(1, Ordering::SeqCst);
                    if accept_shared.refuse.load(Ordering::Relaxed) {
                        drop(stream);
                        continue;
                    }
                    let conn_shared = accept_shared.clone();
                    thread::spawn(move || serve(stream, conn_shared));
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(POLL),
                Err(_) => break,
            }
        });

        MockConsole { addr, shared }
    }

    /// A connection descriptor targeting this console. `extra` is appended
    /// verbatim after the host and port options.
    pub fn descriptor(&self, extra: &str) -> String {
        format!(
            "tcp(host=127.0.0.1, port={}{})",
            self.addr.port(),
            extra
        )
    }

    /// While refusing, connections are accepted and dropped before the
    /// handshake, so every client attempt fails but still counts.
    pub fn set_refuse(&self, refuse: bool) {
        self.shared.refuse.store(refuse, Ordering::Relaxed);
    }

    pub fn accepts(&self) -> usize {
        self.shared.accepts.load(Ordering::SeqCst)
    }

    pub fn handshakes(&self) -> usize {
        self.shared.handshakes.load(Ordering::SeqCst)
    }

    pub fn packets(&self) -> Vec<Packet> {
        self.shared.packets.lock().expect("lock poisoned").clone()
    }

    pub fn log_headers(&self) -> Vec<String> {
        self.shared
            .log_headers
            .lock()
            .expect("lock poisoned")
            .clone()
    }

    /// Polls until `predicate` holds or the deadline passes. Returns whether
    /// it held.
    pub fn wait_until(&self, timeout: Duration, predicate: impl Fn(&Self) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if predicate(self) {
                return true;
            }
            thread::sleep(POLL);
        }
        predicate(self)
    }

    pub fn wait_for_packets(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |console| console.packets().len() >= count)
    }

    pub fn wait_for_handshakes(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |console| console.handshakes() >= count)
    }
}

impl Drop for MockConsole {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Relaxed);
    }
}

fn serve(mut stream: TcpStream, shared: Arc<Shared>) {
    if stream.write_all(BANNER).is_err() {
        return;
    }
    // client banner line
    let mut byte = [0u8; 1];
    loop {
        match stream.read(&mut byte) {
            Ok(1) if byte[0] == b'\n' => break,
            Ok(1) => {}
            _ => return,
        }
    }
    shared.handshakes.fetch_add(1, Ordering::SeqCst);

    loop {
        if shared.stop.load(Ordering::Relaxed) {
            return;
        }
        let mut size_buf = [0u8; 4];
        if stream.read_exact(&mut size_buf).is_err() {
            return;
        }
        let size = u32::from_le_bytes(size_buf) as usize;
        let mut rest = vec![0u8; size];
        if stream.read_exact(&mut rest).is_err() {
            return;
        }

        let mut frame = Vec::with_capacity(4 + size);
        frame.extend_from_slice(&size_buf);
        frame.extend_from_slice(&rest);
        match wire::decode(&frame) {
            Ok(packet) => match &packet.body {
                PacketBody::LogHeader { content } => shared
                    .log_headers
                    .lock()
                    .expect("lock poisoned")
                    .push(content.clone()),
                _ => shared
                    .packets
                    .lock()
                    .expect("lock poisoned")
                    .push(packet),
            },
            Err(_) => return,
        }

        if stream.write_all(&[b'O', b'K']).is_err() {
            return;
        }
    }
}
