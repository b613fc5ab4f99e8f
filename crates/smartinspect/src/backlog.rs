// Copyright 2025-Present the smartinspect-rs authors
// SPDX-License-Identifier: Apache-2.0

//! Ring buffer for packets produced while disconnected.
//!
//! Owned exclusively by the sender, so it needs no lock of its own. Overflow
//! evicts oldest-first; the flush-on level marks the backlog urgent so the
//! whole buffer goes out as one burst the moment a connection is available.

use crate::level::Level;
use crate::wire::EncodedPacket;
use std::collections::VecDeque;

pub(crate) struct Backlog {
    capacity: usize,
    flush_on: Level,
    items: VecDeque<EncodedPacket>,
    bytes: usize,
    flush_pending: bool,
    dropped: usize,
}

impl Backlog {
    pub fn new(capacity: usize, flush_on: Level) -> Self {
        Backlog {
            capacity,
            flush_on,
            items: VecDeque::new(),
            bytes: 0,
            flush_pending: false,
            dropped: 0,
        }
    }

    /// Appends a packet, evicting oldest-first until the budget holds. A
    /// packet at or above the flush-on level marks the backlog urgent.
    pub fn push(&mut self, packet: EncodedPacket) {
        if packet.level >= self.flush_on {
            self.flush_pending = true;
        }
        self.bytes += packet.size();
        self.items.push_back(packet);
        while self.bytes > self.capacity {
            match self.items.pop_front() {
                Some(old) => {
                    self.bytes -= old.size();
                    self.dropped += 1;
                }
                None => {
                    self.bytes = 0;
                    break;
                }
            }
        }
    }

    /// Removes the oldest packet for transmission.
    pub fn pop_front(&mut self) -> Option<EncodedPacket> {
        let packet = self.items.pop_front()?;
        self.bytes -= packet.size();
        if self.items.is_empty() {
            self.flush_pending = false;
        }
        Some(packet)
    }

    /// Puts back a packet whose transmission failed mid-replay. Re-adds
    /// exactly what was just removed, so the budget still holds.
    pub fn push_front(&mut self, packet: EncodedPacket) {
        if packet.level >= self.flush_on {
            self.flush_pending = true;
        }
        self.bytes += packet.size();
        self.items.push_front(packet);
    }

    /// Takes the count of packets evicted since the last report.
    pub fn take_dropped(&mut self) -> usize {
        std::mem::take(&mut self.dropped)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// True when a packet at or above the flush-on level is waiting.
    pub fn flush_pending(&self) -> bool {
        self.flush_pending
    }
}
