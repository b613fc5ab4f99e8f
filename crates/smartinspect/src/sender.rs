// Copyright 2025-Present the smartinspect-rs authors
// SPDX-License-Identifier: Apache-2.0

//! The single background task draining the dispatch queue into the console.
//!
//! The sender owns the connection manager and the backlog outright, so
//! neither needs a lock. Producers only touch the queue; everything that can
//! block on the network happens here.

use crate::backlog::Backlog;
use crate::config::ClientOptions;
use crate::connection::{ConnectionManager, ConnectionObserver};
use crate::error::ClientError;
use crate::queue::{DispatchQueue, Envelope};
use std::sync::atomic::AtomicU8;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub(crate) struct Sender {
    queue: Arc<DispatchQueue>,
    backlog: Backlog,
    conn: ConnectionManager,
    observer: Arc<dyn ConnectionObserver>,
    cancel: CancellationToken,
    /// Faults raised on producer threads; the observer only ever runs here.
    faults: Option<mpsc::UnboundedReceiver<ClientError>>,
    reconnect: bool,
    backlog_enabled: bool,
    clear_on_disconnect: bool,
    initial_done: bool,
}

impl Sender {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<DispatchQueue>,
        options: &ClientOptions,
        app_name: &str,
        host_name: &str,
        observer: Arc<dyn ConnectionObserver>,
        state: Arc<AtomicU8>,
        cancel: CancellationToken,
        faults: mpsc::UnboundedReceiver<ClientError>,
    ) -> Result<Self, ClientError> {
        let conn = ConnectionManager::new(options, app_name, host_name, observer.clone(), state)?;
        Ok(Sender {
            queue,
            backlog: Backlog::new(options.backlog_capacity, options.backlog_flush_on),
            conn,
            observer,
            cancel,
            faults: Some(faults),
            reconnect: options.reconnect,
            backlog_enabled: options.backlog_enabled,
            clear_on_disconnect: options.async_clear_on_disconnect,
            initial_done: false,
        })
    }

    /// Whether the sender should be trying to establish a connection right
    /// now. The very first attempt is always wanted; after that only when
    /// reconnect is enabled or the backlog holds an urgent packet.
    fn connect_wanted(&self) -> bool {
        !self.initial_done
            || self.reconnect
            || (self.backlog_enabled && self.backlog.flush_pending())
    }

    pub async fn run(mut self) {
        let mut faults = match self.faults.take() {
            Some(faults) => faults,
            None => return,
        };
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            if !self.conn.is_connected()
                && self.connect_wanted()
                && self.conn.attempt_permitted(Instant::now())
            {
                self.initial_done = true;
                if self.conn.connect().await {
                    self.replay_backlog().await;
                }
                continue;
            }

            let gate_pending = !self.conn.is_connected() && self.connect_wanted();
            let next_attempt = self.conn.next_attempt_at();
            let queue = self.queue.clone();
            let cancel = self.cancel.clone();

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                fault = faults.recv() => match fault {
                    Some(fault) => self.observer.on_error(&fault),
                    // channel closed means the client handle tore the
                    // pipeline down, cancellation follows immediately
                    None => break,
                },
                envelope = queue.pop() => match envelope {
                    Some(envelope) => self.dispatch(envelope).await,
                    None => break,
                },
                _ = sleep_until(next_attempt), if gate_pending => {}
            }
        }
        while let Ok(fault) = faults.try_recv() {
            self.observer.on_error(&fault);
        }
        self.shutdown().await;
    }

    async fn dispatch(&mut self, envelope: Envelope) {
        let Envelope { packet, done } = envelope;
        if self.conn.is_connected() {
            if let Err(error) = self.conn.transmit(&packet.frame).await {
                debug!(%error, "transmit failed, rerouting packet to backlog");
                self.on_connection_lost();
                self.store(packet);
            }
        } else {
            self.store(packet);
        }
        if let Some(done) = done {
            let _ = done.send(());
        }
    }

    /// Parks a packet in the backlog, or drops it when backlog keeping is
    /// disabled. Evictions are surfaced through the observer in batches.
    fn store(&mut self, packet: crate::wire::EncodedPacket) {
        if !self.backlog_enabled {
            return;
        }
        self.backlog.push(packet);
        let dropped = self.backlog.take_dropped();
        if dropped > 0 {
            warn!(dropped, "backlog over budget, oldest packets dropped");
            self.observer
                .on_error(&ClientError::BacklogOverflow { dropped });
        }
    }

    /// Drains the backlog oldest-first over a live connection. A transmit
    /// failure puts the packet back at the front so replay resumes where it
    /// stopped after the next reconnect.
    async fn replay_backlog(&mut self) {
        while let Some(packet) = self.backlog.pop_front() {
            if self.conn.transmit(&packet.frame).await.is_err() {
                self.backlog.push_front(packet);
                self.on_connection_lost();
                return;
            }
        }
    }

    fn on_connection_lost(&mut self) {
        if self.clear_on_disconnect {
            self.queue.clear();
        }
    }

    /// Final flush: deliver what remains unless the options say to discard
    /// it, then release any producers still parked on a rendezvous.
    async fn shutdown(&mut self) {
        self.queue.close();
        if !self.clear_on_disconnect {
            let pending = self.queue.len() > 0 || !self.backlog.is_empty();
            if pending && !self.conn.is_connected() {
                // shutdown ignores the reconnect gate, it gets one attempt
                self.conn.connect().await;
            }
            if self.conn.is_connected() {
                self.replay_backlog().await;
                for envelope in self.queue.drain() {
                    if self.conn.is_connected() {
                        if let Err(error) = self.conn.transmit(&envelope.packet.frame).await {
                            debug!(%error, "shutdown flush interrupted");
                        }
                    }
                    envelope.complete();
                }
            }
        }
        for envelope in self.queue.drain() {
            envelope.complete();
        }
        self.conn.disconnect();
    }
}
