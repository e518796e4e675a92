//! Go-style channel with async send/recv.
//!
//! A [`Chan`] is a single handle used by both producers and consumers; clones
//! address the same channel. Three buffering modes:
//!
//! - [`Capacity::Rendezvous`] - no buffer; a send completes only when a
//!   receive takes its value
//! - [`Capacity::Bounded`] - send suspends while `n` values are unconsumed
//! - [`Capacity::Unbounded`] - send never suspends
//!
//! Closing is one-way. Values queued before `close()` are still delivered in
//! FIFO order; after that every receiver, including all concurrently
//! suspended ones, sees `None`.
//!
//! A rendezvous send parks its value as an offer owned by the suspended
//! sender. The send completes when a receive takes the offer. Dropping either
//! side before that leaves the other side waiting: a cancelled receive takes
//! nothing, and a cancelled send withdraws its offer.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::Error;

/// Buffering mode of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    /// Handshake channel: no buffering.
    Rendezvous,
    /// Buffer of at most `n` unconsumed values (`n > 0`).
    Bounded(usize),
    /// Sends never suspend.
    Unbounded,
}

impl Capacity {
    /// Map a Go-style size: `0` is rendezvous, negative is unbounded.
    pub fn from_size(size: i64) -> Self {
        match size {
            0 => Capacity::Rendezvous,
            n if n < 0 => Capacity::Unbounded,
            n => Capacity::Bounded(n as usize),
        }
    }
}

/// Error returned by [`Chan::send`] when the channel is closed.
///
/// Hands the unsent value back.
#[derive(PartialEq, Eq)]
pub struct SendError<T>(pub T);

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SendError(..)")
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("sending on a closed channel")
    }
}

impl<T> std::error::Error for SendError<T> {}

impl<T> From<SendError<T>> for Error {
    fn from(_: SendError<T>) -> Self {
        Error::ChannelClosed
    }
}

/// Error returned by [`Chan::try_send`].
#[derive(PartialEq, Eq)]
pub enum TrySendError<T> {
    /// The send would have to suspend.
    Full(T),
    Closed(T),
}

impl<T> fmt::Debug for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::Full(_) => f.write_str("Full(..)"),
            TrySendError::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

/// Error returned by [`Chan::try_recv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryRecvError {
    Empty,
    Closed,
}

type Ticket = u64;

struct State<T> {
    /// Buffered values of a bounded or unbounded channel.
    queue: VecDeque<T>,
    /// Values of suspended rendezvous senders, oldest first.
    offers: VecDeque<(Ticket, T)>,
    next_ticket: Ticket,
    closed: bool,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    capacity: Capacity,
    /// Woken when a value is queued or the channel closes.
    readable: Notify,
    /// Woken when a value is taken or the channel closes.
    writable: Notify,
}

impl<T> Shared<T> {
    /// Whether a buffered send can complete now. Never true for rendezvous.
    fn has_room(&self, state: &State<T>) -> bool {
        match self.capacity {
            Capacity::Rendezvous => false,
            Capacity::Bounded(n) => state.queue.len() < n,
            Capacity::Unbounded => true,
        }
    }

    /// Take the next value a receive may observe.
    ///
    /// A closed rendezvous channel yields nothing; its parked senders
    /// reclaim their offers.
    fn take(&self, state: &mut State<T>) -> Option<T> {
        match self.capacity {
            Capacity::Rendezvous if state.closed => None,
            Capacity::Rendezvous => state.offers.pop_front().map(|(_, value)| value),
            _ => state.queue.pop_front(),
        }
    }

    fn withdraw(&self, state: &mut State<T>, ticket: Ticket) -> Option<T> {
        let position = state.offers.iter().position(|(t, _)| *t == ticket)?;
        state.offers.remove(position).map(|(_, value)| value)
    }
}

/// Async channel shared by senders and receivers.
pub struct Chan<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Chan<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Chan<T> {
    /// Create a channel.
    ///
    /// `Capacity::Bounded(0)` is treated as rendezvous.
    pub fn new(capacity: Capacity) -> Self {
        let capacity = match capacity {
            Capacity::Bounded(0) => Capacity::Rendezvous,
            other => other,
        };
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    offers: VecDeque::new(),
                    next_ticket: 0,
                    closed: false,
                }),
                capacity,
                readable: Notify::new(),
                writable: Notify::new(),
            }),
        }
    }

    /// Create a channel from a Go-style size (see [`Capacity::from_size`]).
    pub fn with_size(size: i64) -> Self {
        Self::new(Capacity::from_size(size))
    }

    #[inline]
    pub fn capacity(&self) -> Capacity {
        self.shared.capacity
    }

    /// Send a value, suspending while the channel has no room for it.
    ///
    /// On a rendezvous channel this suspends until a receive has taken the
    /// value.
    ///
    /// # Errors
    ///
    /// Returns the value back if the channel is closed, including when it is
    /// closed while this send is suspended.
    pub async fn send(&self, value: T) -> Result<(), SendError<T>> {
        if self.shared.capacity == Capacity::Rendezvous {
            return self.handshake(value).await;
        }
        loop {
            let writable = self.shared.writable.notified();
            {
                let mut state = self.shared.state.lock();
                if state.closed {
                    return Err(SendError(value));
                }
                if self.shared.has_room(&state) {
                    state.queue.push_back(value);
                    drop(state);
                    self.shared.readable.notify_waiters();
                    return Ok(());
                }
            }
            writable.await;
        }
    }

    async fn handshake(&self, value: T) -> Result<(), SendError<T>> {
        let ticket = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Err(SendError(value));
            }
            let ticket = state.next_ticket;
            state.next_ticket += 1;
            state.offers.push_back((ticket, value));
            ticket
        };
        let _offer = Offer {
            shared: &self.shared,
            ticket,
        };
        self.shared.readable.notify_waiters();

        loop {
            let taken = self.shared.writable.notified();
            {
                let mut state = self.shared.state.lock();
                if !state.offers.iter().any(|(t, _)| *t == ticket) {
                    return Ok(());
                }
                if state.closed {
                    if let Some(value) = self.shared.withdraw(&mut state, ticket) {
                        return Err(SendError(value));
                    }
                }
            }
            taken.await;
        }
    }

    /// Send without suspending.
    ///
    /// A rendezvous send cannot complete without waiting for its receiver,
    /// so on a rendezvous channel this always reports `Full`.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(TrySendError::Closed(value));
        }
        if !self.shared.has_room(&state) {
            return Err(TrySendError::Full(value));
        }
        state.queue.push_back(value);
        drop(state);
        self.shared.readable.notify_waiters();
        Ok(())
    }

    /// Receive the next value.
    ///
    /// Returns `None` once the channel is closed and every value queued
    /// before the close has been taken.
    pub async fn recv(&self) -> Option<T> {
        loop {
            let readable = self.shared.readable.notified();
            {
                let mut state = self.shared.state.lock();
                if let Some(value) = self.shared.take(&mut state) {
                    drop(state);
                    self.shared.writable.notify_waiters();
                    return Some(value);
                }
                if state.closed {
                    return None;
                }
            }
            readable.await;
        }
    }

    /// Receive without suspending.
    ///
    /// On a rendezvous channel this takes the value of a suspended sender.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let mut state = self.shared.state.lock();
        match self.shared.take(&mut state) {
            Some(value) => {
                drop(state);
                self.shared.writable.notify_waiters();
                Ok(value)
            }
            None if state.closed => Err(TryRecvError::Closed),
            None => Err(TryRecvError::Empty),
        }
    }

    /// Close the channel.
    ///
    /// Further sends fail; suspended senders are woken and fail; receivers
    /// drain what is queued and then see `None`. Closing twice is a no-op.
    pub fn close(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.shared.readable.notify_waiters();
        self.shared.writable.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Number of buffered, unconsumed values. Always zero for rendezvous.
    pub fn len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().queue.is_empty()
    }

    /// Whether a send would complete without suspending.
    ///
    /// Never true for a rendezvous channel.
    pub fn send_ready(&self) -> bool {
        let state = self.shared.state.lock();
        !state.closed && self.shared.has_room(&state)
    }

    /// Whether a receive would complete without suspending.
    pub fn recv_ready(&self) -> bool {
        let state = self.shared.state.lock();
        state.closed || !state.queue.is_empty() || !state.offers.is_empty()
    }
}

impl<T: Send + 'static> Chan<T> {
    /// An owned receive operation, for use in a [`Selection`](super::Selection).
    pub fn recv_op(&self) -> impl Future<Output = Option<T>> + Send + 'static {
        let chan = self.clone();
        async move { chan.recv().await }
    }

    /// An owned send operation, for use in a [`Selection`](super::Selection).
    pub fn send_op(&self, value: T) -> impl Future<Output = Result<(), SendError<T>>> + Send + 'static {
        let chan = self.clone();
        async move { chan.send(value).await }
    }

    /// The received values as a stream that ends when the channel closes.
    ///
    /// The stream is lazy and cannot be restarted once it has ended.
    pub fn stream(&self) -> impl Stream<Item = T> + Send + 'static {
        futures::stream::unfold(self.clone(), |chan| async move {
            let value = chan.recv().await?;
            Some((value, chan))
        })
    }
}

impl<T> PartialEq for Chan<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl<T> Eq for Chan<T> {}

impl<T> fmt::Debug for Chan<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Chan")
            .field("capacity", &self.shared.capacity)
            .field("len", &state.queue.len())
            .field("offers", &state.offers.len())
            .field("closed", &state.closed)
            .finish()
    }
}

/// A rendezvous sender's parked value.
///
/// Dropping a send that has not completed withdraws the offer, so no
/// receive can take a value whose send never finished.
struct Offer<'a, T> {
    shared: &'a Shared<T>,
    ticket: Ticket,
}

impl<T> Drop for Offer<'_, T> {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        self.shared.withdraw(&mut state, self.ticket);
    }
}
