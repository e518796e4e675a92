//! Sliding-window flow control.
//!
//! The transport has no flow control of its own, so each side limits how
//! many messages it transmits before the peer acknowledges them with a
//! `reset`. Accounting is half-duplex per direction:
//!
//! - outbound: at most `window_size` messages are transmitted between two
//!   resets from the peer; the rest wait in a FIFO backlog;
//! - inbound: the message that brings the received count up to
//!   `window_size` makes us send a `reset` and start counting from zero.
//!
//! [`FlowWindow`] holds only the counters and the backlog. It performs no
//! I/O and has a single owner (the connection's read loop), so it needs no
//! synchronization.

use std::collections::VecDeque;

/// Outcome of [`FlowWindow::on_receive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveDecision {
    /// Deliver the message; the window still has room.
    Deliver,
    /// Deliver the message and send a `reset` to the peer.
    DeliverAndReset,
}

/// Snapshot of a window's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlowStats {
    pub window_size: usize,
    pub sent: usize,
    pub received: usize,
    pub deferred: usize,
}

/// Window bookkeeping for one connection.
///
/// `T` is whatever the owner needs to keep for a deferred send.
#[derive(Debug)]
pub struct FlowWindow<T> {
    window_size: usize,
    sent: usize,
    received: usize,
    deferred: VecDeque<T>,
}

impl<T> FlowWindow<T> {
    /// A window that has not been announced yet.
    ///
    /// Its size is zero, so every send is deferred until the peer's `set`
    /// arrives.
    pub fn new() -> Self {
        Self::with_size(0)
    }

    pub fn with_size(window_size: usize) -> Self {
        Self {
            window_size,
            sent: 0,
            received: 0,
            deferred: VecDeque::new(),
        }
    }

    /// Apply the peer's `set` announcement.
    ///
    /// A shrinking window caps the sent count at the new size.
    pub fn on_set(&mut self, window_size: usize, received: usize) {
        self.window_size = window_size;
        self.sent = self.sent.min(window_size);
        self.received = received;
    }

    /// Offer an outbound message.
    ///
    /// Returns `Some(item)` if it may be transmitted now (the sent count has
    /// been taken), or `None` if it was queued behind the window. A message
    /// never overtakes an older deferred one.
    pub fn admit(&mut self, item: T) -> Option<T> {
        if self.deferred.is_empty() && self.sent < self.window_size {
            self.sent += 1;
            Some(item)
        } else {
            self.deferred.push_back(item);
            None
        }
    }

    /// Take the oldest deferred message if the window now has room for it.
    pub fn pop_ready(&mut self) -> Option<T> {
        if self.sent >= self.window_size {
            return None;
        }
        let item = self.deferred.pop_front()?;
        self.sent += 1;
        Some(item)
    }

    /// Count one delivered inbound message.
    pub fn on_receive(&mut self) -> ReceiveDecision {
        if self.received + 1 >= self.window_size {
            self.received = 0;
            ReceiveDecision::DeliverAndReset
        } else {
            self.received += 1;
            ReceiveDecision::Deliver
        }
    }

    /// Apply the peer's `reset`.
    pub fn on_reset(&mut self, sent: usize) {
        self.sent = sent.min(self.window_size);
    }

    /// Remove every deferred message, oldest first.
    pub fn drain_deferred(&mut self) -> impl Iterator<Item = T> + '_ {
        self.deferred.drain(..)
    }

    #[inline]
    pub fn window_size(&self) -> usize {
        self.window_size
    }

    #[inline]
    pub fn sent(&self) -> usize {
        self.sent
    }

    #[inline]
    pub fn received(&self) -> usize {
        self.received
    }

    #[inline]
    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    pub fn stats(&self) -> FlowStats {
        FlowStats {
            window_size: self.window_size,
            sent: self.sent,
            received: self.received,
            deferred: self.deferred.len(),
        }
    }
}

impl<T> Default for FlowWindow<T> {
    fn default() -> Self {
        Self::new()
    }
}
