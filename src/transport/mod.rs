//! Transport module - message-oriented duplex links.
//!
//! A [`Transport`] is a boxed sink of outbound [`WireMessage`]s plus a boxed
//! stream of inbound ones. Two sources are provided:
//!
//! - [`websocket::connect`] - a `ws://` client connection
//! - [`Transport::memory_pair`] - two linked in-process ends, used by tests
//!   and in-process peers

pub mod websocket;

use std::fmt;
use std::pin::Pin;

use bytes::Bytes;
use futures::channel::mpsc;
use futures::{Sink, SinkExt, Stream, StreamExt};

use crate::error::{Error, Result};
use crate::protocol::CloseInfo;

/// One frame on a message-oriented link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// MsgPack-encoded envelope.
    Binary(Bytes),
    /// JSON-encoded envelope.
    Text(String),
    /// Closure of the link, with optional code and reason.
    Close(Option<CloseInfo>),
}

impl WireMessage {
    #[inline]
    pub fn is_close(&self) -> bool {
        matches!(self, WireMessage::Close(_))
    }
}

/// Outbound half of a transport.
pub type BoxSink = Pin<Box<dyn Sink<WireMessage, Error = Error> + Send>>;

/// Inbound half of a transport.
pub type BoxStream = Pin<Box<dyn Stream<Item = Result<WireMessage>> + Send>>;

/// A duplex, message-oriented link.
pub struct Transport {
    pub sink: BoxSink,
    pub stream: BoxStream,
}

impl Transport {
    pub fn new<S, R>(sink: S, stream: R) -> Self
    where
        S: Sink<WireMessage, Error = Error> + Send + 'static,
        R: Stream<Item = Result<WireMessage>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }

    /// Two transports wired to each other.
    ///
    /// Whatever one end sends, the other receives. Closing or dropping one
    /// end's sink ends the other end's stream. `buffer` bounds each
    /// direction.
    pub fn memory_pair(buffer: usize) -> (Transport, Transport) {
        let (a_tx, a_rx) = mpsc::channel(buffer);
        let (b_tx, b_rx) = mpsc::channel(buffer);
        (Self::memory_end(a_tx, b_rx), Self::memory_end(b_tx, a_rx))
    }

    fn memory_end(tx: mpsc::Sender<WireMessage>, rx: mpsc::Receiver<WireMessage>) -> Transport {
        Transport::new(tx.sink_map_err(|_| Error::ChannelClosed), rx.map(Ok))
    }

    /// Split into the outbound and inbound halves.
    pub fn into_parts(self) -> (BoxSink, BoxStream) {
        (self.sink, self.stream)
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}
