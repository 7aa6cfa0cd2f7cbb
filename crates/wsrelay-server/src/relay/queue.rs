//! FIFO buffer for client payloads that arrive before upstream is open.

use std::collections::VecDeque;

use wsrelay_core::Payload;

/// Ordered buffer with an optional capacity.
#[derive(Debug, Default)]
pub struct PendingQueue {
    items: VecDeque<Payload>,
    /// `0` means unbounded.
    capacity: usize,
}

impl PendingQueue {
    /// Create a queue holding at most `capacity` payloads (`0` = unbounded).
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            capacity,
        }
    }

    /// Append a payload, handing it back if the queue is full.
    pub fn push(&mut self, payload: Payload) -> Result<(), Payload> {
        if self.is_full() {
            return Err(payload);
        }
        self.items.push_back(payload);
        Ok(())
    }

    /// Remove every payload in arrival order.
    pub fn drain(&mut self) -> impl Iterator<Item = Payload> + '_ {
        self.items.drain(..)
    }

    /// Discard everything.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Number of queued payloads.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether another push would be refused.
    pub fn is_full(&self) -> bool {
        self.capacity != 0 && self.items.len() >= self.capacity
    }

    /// Total queued bytes.
    pub fn bytes(&self) -> usize {
        self.items.iter().map(Payload::len).sum()
    }
}
