// Copyright 2025-Present the smartinspect-rs authors
// SPDX-License-Identifier: Apache-2.0

//! Connection state machine, host resolution, and time-gated reconnect.
//!
//! The manager is owned by the sender task and mutated only there; the
//! current [`ConnectionState`] is published through an atomic so producer
//! threads can read it without locking. All transport faults are absorbed
//! here and reported through the observer, never to logging callers.

use crate::config::ClientOptions;
use crate::error::ClientError;
use crate::level::Level;
use crate::packet::{now_micros, Packet, PacketBody};
use bytes::Bytes;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tracing::debug;

const CLIENT_BANNER: &str = concat!("SmartInspect Rust Library v", env!("CARGO_PKG_VERSION"), "\n");
const ACK_SIZE: usize = 2;
const MAX_BANNER: usize = 1024;

/// Connection lifecycle state, readable by any thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

impl ConnectionState {
    pub(crate) fn from_u8(raw: u8) -> ConnectionState {
        match raw {
            2 => ConnectionState::Connected,
            1 => ConnectionState::Connecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Lifecycle notifications, invoked on the sender's execution context and
/// never synchronously from a producer call. All methods default to no-ops.
pub trait ConnectionObserver: Send + Sync {
    /// A connection was established. `reconnect` is false for the first
    /// successful connect of the client's lifetime, true afterwards.
    fn on_connect(&self, reconnect: bool) {
        let _ = reconnect;
    }

    /// An established connection was lost or closed.
    fn on_disconnect(&self) {}

    /// A fault was absorbed by the pipeline (transport error, encode
    /// failure, backlog overflow).
    fn on_error(&self, error: &ClientError) {
        let _ = error;
    }
}

pub(crate) struct NoopObserver;

impl ConnectionObserver for NoopObserver {}

/// Time gate for reconnect attempts: a new attempt is permitted only when
/// the configured interval has elapsed since the *start* of the previous
/// attempt, regardless of how many failures occurred in between.
pub(crate) struct RetryGate {
    interval: Duration,
    last_attempt: Option<Instant>,
}

impl RetryGate {
    pub fn new(interval: Duration) -> Self {
        RetryGate {
            interval,
            last_attempt: None,
        }
    }

    pub fn permits(&self, now: Instant) -> bool {
        match self.last_attempt {
            Some(last) => now.duration_since(last) >= self.interval,
            None => true,
        }
    }

    pub fn note_attempt(&mut self, now: Instant) {
        self.last_attempt = Some(now);
    }

    /// Earliest instant at which the next attempt is permitted.
    pub fn next_allowed(&self) -> Instant {
        match self.last_attempt {
            Some(last) => last + self.interval,
            None => Instant::now(),
        }
    }
}

/// Picks the gateway address from WSL config files. `version` is the content
/// of `/proc/version`, `resolv` the content of `/etc/resolv.conf`.
pub(crate) fn parse_wsl_gateway(version: &str, resolv: &str) -> Option<String> {
    let version = version.to_ascii_lowercase();
    if !version.contains("microsoft") && !version.contains("wsl") {
        return None;
    }
    for line in resolv.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("nameserver") {
            let ip = rest.trim();
            if ip.starts_with("172.") || ip.starts_with("192.168.") || ip.starts_with("10.") {
                return Some(ip.to_string());
            }
        }
    }
    None
}

fn detect_wsl_gateway() -> Option<String> {
    let version = std::fs::read_to_string("/proc/version").ok()?;
    let resolv = std::fs::read_to_string("/etc/resolv.conf").unwrap_or_default();
    parse_wsl_gateway(&version, &resolv)
}

/// Resolves the effective console host. An explicit host always wins; with
/// no host configured, a process inside WSL targets the Windows-side gateway
/// instead of its own loopback.
pub(crate) fn resolve_host(configured: Option<&str>) -> String {
    match configured {
        Some(host) => host.to_string(),
        None => detect_wsl_gateway().unwrap_or_else(|| "127.0.0.1".to_string()),
    }
}

pub(crate) struct ConnectionManager {
    host: String,
    port: u16,
    timeout: Duration,
    log_header: Bytes,
    observer: Arc<dyn ConnectionObserver>,
    state: Arc<AtomicU8>,
    gate: RetryGate,
    stream: Option<TcpStream>,
    connected_once: bool,
}

impl ConnectionManager {
    pub fn new(
        options: &ClientOptions,
        app_name: &str,
        host_name: &str,
        observer: Arc<dyn ConnectionObserver>,
        state: Arc<AtomicU8>,
    ) -> Result<Self, ClientError> {
        let content = format!(
            "hostname={}\r\nappname={}\r\nroom={}\r\n",
            host_name, app_name, options.room
        );
        let header = Packet {
            level: Level::Control,
            timestamp_us: now_micros(),
            session: String::new(),
            context: Vec::new(),
            correlation_id: None,
            operation: None,
            body: PacketBody::LogHeader { content },
        };
        Ok(ConnectionManager {
            host: resolve_host(options.host.as_deref()),
            port: options.port,
            timeout: options.timeout,
            log_header: header.encode()?.frame,
            observer,
            state,
            gate: RetryGate::new(options.reconnect_interval),
            stream: None,
            connected_once: false,
        })
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn attempt_permitted(&self, now: Instant) -> bool {
        self.gate.permits(now)
    }

    pub fn next_attempt_at(&self) -> Instant {
        self.gate.next_allowed()
    }

    /// One connection attempt: resolve, dial, handshake. Notes the attempt
    /// start for time gating whether or not it succeeds. Returns whether the
    /// client is now connected.
    pub async fn connect(&mut self) -> bool {
        self.gate.note_attempt(Instant::now());
        self.set_state(ConnectionState::Connecting);
        match self.handshake().await {
            Ok(stream) => {
                self.stream = Some(stream);
                self.set_state(ConnectionState::Connected);
                let reconnect = self.connected_once;
                self.connected_once = true;
                debug!(host = %self.host, port = self.port, reconnect, "connected to console");
                self.observer.on_connect(reconnect);
                true
            }
            Err(error) => {
                self.stream = None;
                self.set_state(ConnectionState::Disconnected);
                debug!(host = %self.host, port = self.port, %error, "connection attempt failed");
                self.observer.on_error(&error);
                false
            }
        }
    }

    async fn handshake(&self) -> Result<TcpStream, ClientError> {
        let elapsed =
            |_| ClientError::Connection(format!("timed out connecting to {}:{}", self.host, self.port));

        let mut stream = timeout(
            self.timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(elapsed)?
        .map_err(|e| {
            ClientError::Connection(format!("connect to {}:{}: {}", self.host, self.port, e))
        })?;
        stream.set_nodelay(true)?;

        // read the console banner line
        timeout(self.timeout, async {
            let mut banner = Vec::new();
            let mut byte = [0u8; 1];
            loop {
                let n = stream.read(&mut byte).await?;
                if n == 0 {
                    return Err(ClientError::Connection(
                        "console closed connection during handshake".to_string(),
                    ));
                }
                if byte[0] == b'\n' {
                    return Ok(());
                }
                banner.push(byte[0]);
                if banner.len() > MAX_BANNER {
                    return Err(ClientError::Connection("console banner too long".to_string()));
                }
            }
        })
        .await
        .map_err(elapsed)??;

        stream.write_all(CLIENT_BANNER.as_bytes()).await?;
        let log_header = self.log_header.clone();
        write_frame(&mut stream, &log_header, self.timeout).await?;
        Ok(stream)
    }

    /// Sends one frame and waits for the console's acknowledgment. Any I/O
    /// fault drops the connection back to Disconnected.
    pub async fn transmit(&mut self, frame: &[u8]) -> Result<(), ClientError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ClientError::Connection("not connected".to_string()))?;
        match write_frame(stream, frame, self.timeout).await {
            Ok(()) => Ok(()),
            Err(error) => {
                self.drop_connection();
                self.observer.on_error(&error);
                Err(error)
            }
        }
    }

    fn drop_connection(&mut self) {
        let was_connected = self.state() == ConnectionState::Connected;
        self.stream = None;
        self.set_state(ConnectionState::Disconnected);
        if was_connected {
            self.observer.on_disconnect();
        }
    }

    /// Closes the transport deliberately.
    pub fn disconnect(&mut self) {
        self.drop_connection();
    }
}

async fn write_frame(
    stream: &mut TcpStream,
    frame: &[u8],
    limit: Duration,
) -> Result<(), ClientError> {
    timeout(limit, async {
        stream.write_all(frame).await?;
        stream.flush().await?;
        let mut ack = [0u8; ACK_SIZE];
        stream.read_exact(&mut ack).await?;
        Ok::<(), ClientError>(())
    })
    .await
    .map_err(|_| ClientError::Connection("timed out waiting for console ack".to_string()))?
}
