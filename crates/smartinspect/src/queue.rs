// Copyright 2025-Present the smartinspect-rs authors
// SPDX-License-Identifier: Apache-2.0

//! Byte-budgeted FIFO handoff between producer threads and the sender.
//!
//! Capacity is a serialized-byte budget, not an item count. Producers enqueue
//! synchronously; the single sender drains asynchronously. Under the throttle
//! policy a producer blocks on a condition variable until the sender frees
//! space; under the drop policy the oldest resident packets are evicted until
//! the newcomer fits. Resident bytes never exceed the budget at any
//! observable point.

use crate::error::ClientError;
use crate::wire::EncodedPacket;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use tokio::sync::{oneshot, Notify};

/// Admission policy when an enqueue would exceed the byte budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Block the producer until the sender frees enough space.
    Throttle,
    /// Evict the oldest resident packets until the new packet fits.
    DropOldest,
}

/// A packet in flight plus the optional rendezvous channel used by the
/// synchronous dispatch mode.
pub(crate) struct Envelope {
    pub packet: EncodedPacket,
    pub done: Option<oneshot::Sender<()>>,
}

impl Envelope {
    pub fn new(packet: EncodedPacket) -> Self {
        Envelope { packet, done: None }
    }

    /// Signals the producer blocked on this envelope, if any.
    pub fn complete(self) {
        if let Some(done) = self.done {
            let _ = done.send(());
        }
    }
}

struct Inner {
    items: VecDeque<Envelope>,
    bytes: usize,
    closed: bool,
}

pub(crate) struct DispatchQueue {
    capacity: usize,
    policy: OverflowPolicy,
    inner: Mutex<Inner>,
    space: Condvar,
    ready: Notify,
}

#[allow(clippy::expect_used)]
impl DispatchQueue {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        DispatchQueue {
            capacity,
            policy,
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                bytes: 0,
                closed: false,
            }),
            space: Condvar::new(),
            ready: Notify::new(),
        }
    }

    /// Enqueues an envelope under the configured policy. Blocks under
    /// throttle when the queue is full; never blocks under drop.
    ///
    /// A packet bigger than the whole budget can never be admitted and is
    /// rejected with `QueueFull`. Envelopes arriving after close are
    /// discarded silently.
    pub fn enqueue(&self, envelope: Envelope) -> Result<(), ClientError> {
        self.admit(envelope, true)
    }

    /// Non-blocking variant: where `enqueue` would block under throttle,
    /// this fails with `QueueFull` instead.
    pub fn try_enqueue(&self, envelope: Envelope) -> Result<(), ClientError> {
        self.admit(envelope, false)
    }

    fn admit(&self, envelope: Envelope, may_block: bool) -> Result<(), ClientError> {
        let size = envelope.packet.size();
        let mut inner = self.inner.lock().expect("lock poisoned");
        if inner.closed {
            return Ok(());
        }
        match self.policy {
            OverflowPolicy::Throttle => {
                if size > self.capacity {
                    return Err(ClientError::QueueFull);
                }
                while inner.bytes + size > self.capacity && !inner.closed {
                    if !may_block {
                        return Err(ClientError::QueueFull);
                    }
                    inner = self.space.wait(inner).expect("lock poisoned");
                }
                if inner.closed {
                    return Ok(());
                }
            }
            OverflowPolicy::DropOldest => {
                if size > self.capacity {
                    return Err(ClientError::QueueFull);
                }
                while inner.bytes + size > self.capacity {
                    match inner.items.pop_front() {
                        Some(old) => inner.bytes -= old.packet.size(),
                        None => break,
                    }
                }
            }
        }
        inner.bytes += size;
        inner.items.push_back(envelope);
        drop(inner);
        self.ready.notify_one();
        Ok(())
    }

    /// Bypasses the byte budget. Used by the synchronous dispatch mode,
    /// where the budget does not apply and at most one envelope per blocked
    /// producer is resident.
    pub fn enqueue_unbounded(&self, envelope: Envelope) {
        let size = envelope.packet.size();
        let mut inner = self.inner.lock().expect("lock poisoned");
        if inner.closed {
            return;
        }
        inner.bytes += size;
        inner.items.push_back(envelope);
        drop(inner);
        self.ready.notify_one();
    }

    /// Removes and returns the oldest envelope, waiting for one to arrive.
    /// Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<Envelope> {
        loop {
            let notified = self.ready.notified();
            {
                let mut inner = self.inner.lock().expect("lock poisoned");
                if let Some(envelope) = inner.items.pop_front() {
                    inner.bytes -= envelope.packet.size();
                    drop(inner);
                    self.space.notify_all();
                    return Some(envelope);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Empties the queue, waking any throttled producers. Pending
    /// rendezvous envelopes are released by dropping them.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        inner.items.clear();
        inner.bytes = 0;
        drop(inner);
        self.space.notify_all();
    }

    /// Removes everything at once, preserving order. Used by the shutdown
    /// flush.
    pub fn drain(&self) -> Vec<Envelope> {
        let mut inner = self.inner.lock().expect("lock poisoned");
        inner.bytes = 0;
        let items = inner.items.drain(..).collect();
        drop(inner);
        self.space.notify_all();
        items
    }

    /// Marks the queue closed: producers stop being admitted, blocked ones
    /// wake, and `pop` returns `None` once empty.
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("lock poisoned");
        inner.closed = true;
        drop(inner);
        self.space.notify_all();
        self.ready.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("lock poisoned").items.len()
    }

    pub fn bytes(&self) -> usize {
        self.inner.lock().expect("lock poisoned").bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::Level;
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::Duration;

    fn packet_of(size: usize, marker: u8) -> EncodedPacket {
        EncodedPacket {
            level: Level::Message,
            frame: Bytes::from(vec![marker; size]),
        }
    }

    #[test]
    fn test_drop_policy_bounded_and_oldest_first() {
        let queue = DispatchQueue::new(2048, OverflowPolicy::DropOldest);
        // six packets of 512 bytes: 3072 bytes total, budget 2048
        for marker in 0..6u8 {
            queue.enqueue(Envelope::new(packet_of(512, marker))).unwrap();
            assert!(queue.bytes() <= 2048);
        }
        assert_eq!(queue.bytes(), 2048);
        assert_eq!(queue.len(), 4);

        // the two oldest packets were evicted
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        for expected in 2..6u8 {
            let envelope = rt.block_on(queue.pop()).unwrap();
            assert_eq!(envelope.packet.frame[0], expected);
        }
    }

    #[test]
    fn test_drop_policy_rejects_oversized_packet() {
        let queue = DispatchQueue::new(100, OverflowPolicy::DropOldest);
        queue.enqueue(Envelope::new(packet_of(80, 1))).unwrap();
        let result = queue.enqueue(Envelope::new(packet_of(101, 2)));
        assert!(matches!(result, Err(ClientError::QueueFull)));
        // the resident packet stays; nothing was evicted for a packet that
        // could never fit
        assert_eq!(queue.bytes(), 80);
    }

    #[test]
    fn test_try_enqueue_full_throttle_queue() {
        let queue = DispatchQueue::new(100, OverflowPolicy::Throttle);
        queue.try_enqueue(Envelope::new(packet_of(80, 1))).unwrap();
        let result = queue.try_enqueue(Envelope::new(packet_of(30, 2)));
        assert!(matches!(result, Err(ClientError::QueueFull)));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_throttled_producer_unblocks_when_space_frees() {
        let queue = Arc::new(DispatchQueue::new(100, OverflowPolicy::Throttle));
        queue.enqueue(Envelope::new(packet_of(90, 1))).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.enqueue(Envelope::new(packet_of(50, 2))))
        };
        // give the producer time to block
        std::thread::sleep(Duration::from_millis(50));
        assert!(!producer.is_finished());

        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let first = rt.block_on(queue.pop()).unwrap();
        assert_eq!(first.packet.frame[0], 1);

        producer.join().unwrap().unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.bytes(), 50);
    }

    #[test]
    fn test_close_wakes_blocked_producer() {
        let queue = Arc::new(DispatchQueue::new(100, OverflowPolicy::Throttle));
        queue.enqueue(Envelope::new(packet_of(90, 1))).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.enqueue(Envelope::new(packet_of(50, 2))))
        };
        std::thread::sleep(Duration::from_millis(50));
        queue.close();
        // the late packet is discarded, not an error
        producer.join().unwrap().unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_pop_returns_none_after_close() {
        let queue = DispatchQueue::new(100, OverflowPolicy::Throttle);
        queue.enqueue(Envelope::new(packet_of(10, 1))).unwrap();
        queue.close();

        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        assert!(rt.block_on(queue.pop()).is_some());
        assert!(rt.block_on(queue.pop()).is_none());
    }

    #[test]
    fn test_fifo_order_preserved() {
        let queue = DispatchQueue::new(4096, OverflowPolicy::Throttle);
        for marker in 0..5u8 {
            queue.enqueue(Envelope::new(packet_of(16, marker))).unwrap();
        }
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        for expected in 0..5u8 {
            assert_eq!(rt.block_on(queue.pop()).unwrap().packet.frame[0], expected);
        }
    }

    #[test]
    fn test_clear_empties_and_unblocks() {
        let queue = Arc::new(DispatchQueue::new(100, OverflowPolicy::Throttle));
        queue.enqueue(Envelope::new(packet_of(90, 1))).unwrap();
        let producer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.enqueue(Envelope::new(packet_of(40, 2))))
        };
        std::thread::sleep(Duration::from_millis(50));
        queue.clear();
        producer.join().unwrap().unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.bytes(), 40);
    }
}
