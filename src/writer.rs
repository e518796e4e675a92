//! Dedicated writer task for outbound frames.
//!
//! The transport sink is owned by a single task that receives frames over
//! an mpsc channel, so producers never share the sink behind a lock.
//!
//! ```text
//! read loop  ─┐
//! stop()     ─┼─► mpsc::Sender<WireMessage> ─► Writer Task ─► Sink
//! reset acks ─┘
//! ```
//!
//! Frames that are already queued when the task wakes are fed as one batch
//! and flushed once.

use futures::SinkExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::transport::{BoxSink, WireMessage};

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Maximum frames to batch before a flush.
const MAX_BATCH_SIZE: usize = 64;

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Channel capacity for the frame queue.
    pub channel_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Handle for sending frames to the writer task.
///
/// Cheaply cloneable. The sink is closed once every handle is dropped.
#[derive(Clone, Debug)]
pub struct WriterHandle {
    tx: mpsc::Sender<WireMessage>,
}

impl WriterHandle {
    /// Queue a frame, waiting for room in the channel.
    ///
    /// # Errors
    ///
    /// [`Error::ChannelClosed`] if the writer task has exited.
    pub async fn send(&self, frame: WireMessage) -> Result<()> {
        self.tx.send(frame).await.map_err(|_| Error::ChannelClosed)
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The returned `JoinHandle` resolves when every handle has been dropped and
/// the sink is closed, or with the first write error.
pub fn spawn_writer_task(sink: BoxSink, config: WriterConfig) -> (WriterHandle, JoinHandle<Result<()>>) {
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let task = tokio::spawn(writer_loop(rx, sink));
    (WriterHandle { tx }, task)
}

async fn writer_loop(mut rx: mpsc::Receiver<WireMessage>, mut sink: BoxSink) -> Result<()> {
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
    loop {
        let first = match rx.recv().await {
            Some(frame) => frame,
            None => break,
        };

        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        write_batch(&mut sink, &mut batch).await?;
        tracing::trace!("writer flushed {} frames", batch_size);
    }

    // A close frame may already have shut the sink; that is not an error.
    if let Err(e) = sink.close().await {
        tracing::debug!("writer sink close after drain: {}", e);
    }
    Ok(())
}

async fn write_batch(sink: &mut BoxSink, batch: &mut Vec<WireMessage>) -> Result<()> {
    for frame in batch.drain(..) {
        sink.feed(frame).await?;
    }
    sink.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;
    use bytes::Bytes;
    use futures::StreamExt;

    #[test]
    fn test_writer_config_default() {
        assert_eq!(WriterConfig::default().channel_capacity, DEFAULT_CHANNEL_CAPACITY);
    }

    #[tokio::test]
    async fn test_writer_delivers_in_order() {
        let (local, mut peer) = Transport::memory_pair(64);
        let (handle, _task) = spawn_writer_task(local.sink, WriterConfig::default());

        for i in 0..10u8 {
            handle
                .send(WireMessage::Binary(Bytes::copy_from_slice(&[i])))
                .await
                .unwrap();
        }

        for i in 0..10u8 {
            let frame = peer.stream.next().await.unwrap().unwrap();
            assert_eq!(frame, WireMessage::Binary(Bytes::copy_from_slice(&[i])));
        }
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_handle_drop() {
        let (local, mut peer) = Transport::memory_pair(4);
        let (handle, task) = spawn_writer_task(local.sink, WriterConfig::default());

        handle.send(WireMessage::Text("last".to_string())).await.unwrap();
        drop(handle);

        assert!(task.await.unwrap().is_ok());
        assert_eq!(
            peer.stream.next().await.unwrap().unwrap(),
            WireMessage::Text("last".to_string())
        );
        // The sink was closed after the drain.
        assert!(peer.stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_writer_reports_dead_sink() {
        let (local, peer) = Transport::memory_pair(1);
        drop(peer);
        let (handle, task) = spawn_writer_task(local.sink, WriterConfig::default());

        handle.send(WireMessage::Close(None)).await.unwrap();
        assert!(matches!(task.await.unwrap(), Err(Error::ChannelClosed)));

        assert!(matches!(
            handle.send(WireMessage::Close(None)).await,
            Err(Error::ChannelClosed)
        ));
    }
}
