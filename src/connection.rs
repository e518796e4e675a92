//! Connection lifecycle and windowed flow control.
//!
//! A [`Connection`] runs three tasks over one [`Transport`]:
//!
//! ```text
//!                 ┌────────────┐  Chan<Envelope>  ┌───────────────┐
//! transport ────► │ read loop  │ ───────────────► │ dispatch loop │ ──► Dispatcher
//!                 │ FlowWindow │                  └───────────────┘
//! handles ──cmd─► │            │ ──► writer task ──► transport
//!                 └────────────┘
//! ```
//!
//! The read loop is the only owner of the [`FlowWindow`]. Outbound sends
//! reach it as commands, so the window counters and the deferred backlog
//! have a single writer. Everything the application needs to observe
//! (`open`, `msg`, `sent`, `bpwait`, `bpresume`, `close`, `error`, `stop`)
//! travels to the dispatch loop through the internal channel, in order.
//!
//! Transport failures never escape: a remote close becomes a `close`
//! envelope, an I/O failure an `error` envelope, and either is followed by
//! a final `stop`.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::codec::{decode_message, encode_envelope, Encoding};
use crate::error::{Error, Result};
use crate::handler::Dispatcher;
use crate::keyword::KeywordRegistry;
use crate::protocol::control::{self, CLOSE_ABNORMAL};
use crate::protocol::{
    CloseInfo, Envelope, FlowStats, FlowWindow, Operation, ReceiveDecision, ResetWindow, SetWindow,
};
use crate::sync::{Capacity, Chan};
use crate::transport::{BoxStream, Transport, WireMessage};
use crate::value::Value;
use crate::writer::{spawn_writer_task, WriterConfig, WriterHandle};

/// Identifier of a connection, unique within the process.
pub type ConnectionId = u64;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Default capacity of the internal envelope channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 19;

/// Default writer queue capacity.
pub const DEFAULT_WRITER_CAPACITY: usize = 1024;

/// Default delay between opening a connection and starting the app task.
pub const DEFAULT_OPEN_DELAY: Duration = Duration::from_millis(100);

/// Connection settings.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Capacity of the internal envelope channel (default: 19).
    pub channel_capacity: usize,
    /// Encoding of outbound messages (default: binary).
    pub encoding: Encoding,
    /// Writer queue capacity (default: 1024).
    pub writer_capacity: usize,
    /// Delay before a client's app task is started (default: 100ms).
    pub open_delay: Duration,
    /// Registry that interns keywords of inbound payloads (default: a
    /// fresh one per connection).
    pub keywords: KeywordRegistry,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_EVENT_CAPACITY,
            encoding: Encoding::default(),
            writer_capacity: DEFAULT_WRITER_CAPACITY,
            open_delay: DEFAULT_OPEN_DELAY,
            keywords: KeywordRegistry::new(),
        }
    }
}

/// Lifecycle state. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

fn advance(state: &watch::Sender<ConnectionState>, next: ConnectionState) {
    state.send_if_modified(|current| {
        if next > *current {
            *current = next;
            true
        } else {
            false
        }
    });
}

type Reply = oneshot::Sender<Result<()>>;

/// An application message on its way out.
struct Outbound {
    envelope: Envelope,
    frame: WireMessage,
    encoding: Encoding,
    reply: Option<Reply>,
}

impl Outbound {
    fn fail(self) {
        resolve(self.reply, Err(Error::ConnectionStopped));
    }
}

fn resolve(reply: Option<Reply>, result: Result<()>) {
    if let Some(reply) = reply {
        let _ = reply.send(result);
    }
}

enum Command {
    Send(Outbound),
    Stats(oneshot::Sender<FlowStats>),
    Stop(String),
}

/// Cloneable handle to a running connection.
///
/// All operations go through the read loop, so a handle can be used from
/// any task, including from inside a [`Dispatcher`].
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    encoding: Encoding,
}

impl ConnectionHandle {
    /// A handle attached to no connection.
    ///
    /// It reports [`ConnectionState::Closed`] and every send fails with
    /// [`Error::ConnectionStopped`]. Useful for exercising dispatchers.
    pub fn detached(id: ConnectionId) -> Self {
        let (commands, _) = mpsc::unbounded_channel();
        let (_, state) = watch::channel(ConnectionState::Closed);
        Self {
            id,
            commands,
            state,
            encoding: Encoding::default(),
        }
    }

    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Default encoding of [`send_msg`](Self::send_msg).
    #[inline]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Send an application message and wait until it is handed to the
    /// transport.
    ///
    /// If the window is full the message is deferred (the dispatcher sees a
    /// `bpwait`) and this waits until the peer's `reset` lets it through.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionStopped`] if the connection stops before the
    /// message is transmitted; codec errors if the payload cannot be
    /// encoded.
    pub async fn send_msg(&self, payload: impl Into<Value>) -> Result<()> {
        self.send_msg_with(payload, self.encoding).await
    }

    /// [`send_msg`](Self::send_msg) with an explicit encoding.
    pub async fn send_msg_with(&self, payload: impl Into<Value>, encoding: Encoding) -> Result<()> {
        let (reply, done) = oneshot::channel();
        self.submit(payload.into(), encoding, Some(reply))?;
        done.await.map_err(|_| Error::ConnectionStopped)?
    }

    /// Queue an application message without waiting for it.
    ///
    /// The outcome is reported to the dispatcher as `sent` or `bpwait`.
    pub fn queue_msg(&self, payload: impl Into<Value>) -> Result<()> {
        self.submit(payload.into(), self.encoding, None)
    }

    fn submit(&self, payload: Value, encoding: Encoding, reply: Option<Reply>) -> Result<()> {
        let envelope = Envelope::msg(payload);
        let frame = encode_envelope(&envelope, encoding)?;
        self.commands
            .send(Command::Send(Outbound {
                envelope,
                frame,
                encoding,
                reply,
            }))
            .map_err(|_| Error::ConnectionStopped)
    }

    /// Stop the connection.
    ///
    /// The read loop closes the transport and fails deferred messages. The
    /// dispatcher receives a final `stop`. Stopping twice is a no-op.
    pub fn stop(&self) {
        self.stop_with("local stop");
    }

    /// [`stop`](Self::stop) with the cause reported in the `stop` payload.
    pub fn stop_with(&self, cause: impl Into<String>) {
        let _ = self.commands.send(Command::Stop(cause.into()));
    }

    /// Snapshot of the flow-control counters.
    pub async fn stats(&self) -> Result<FlowStats> {
        let (reply, stats) = oneshot::channel();
        self.commands
            .send(Command::Stats(reply))
            .map_err(|_| Error::ConnectionStopped)?;
        stats.await.map_err(|_| Error::ConnectionStopped)
    }

    /// Wait until the connection reaches [`ConnectionState::Closed`].
    pub async fn wait_closed(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

/// A running connection.
pub struct Connection {
    handle: ConnectionHandle,
    read_task: JoinHandle<()>,
    dispatch_task: JoinHandle<()>,
    writer_task: JoinHandle<Result<()>>,
}

impl Connection {
    /// Start a connection over an established transport.
    ///
    /// The dispatcher first receives `open`. Must be called from within a
    /// tokio runtime.
    pub fn open<D: Dispatcher>(transport: Transport, dispatcher: D, config: ConnectionConfig) -> Self {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let (sink, stream) = transport.into_parts();
        let (writer, writer_task) = spawn_writer_task(
            sink,
            WriterConfig {
                channel_capacity: config.writer_capacity,
            },
        );

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let state = Arc::new(state_tx);
        let events = Chan::new(Capacity::Bounded(config.channel_capacity));

        let handle = ConnectionHandle {
            id,
            commands: commands_tx,
            state: state_rx,
            encoding: config.encoding,
        };

        let read_loop = ReadLoop {
            id,
            window: FlowWindow::new(),
            keywords: config.keywords,
            writer,
            events: events.clone(),
            state: Arc::clone(&state),
        };
        let read_task = tokio::spawn(read_loop.run(stream, commands_rx));
        let dispatch_task = tokio::spawn(dispatch_loop(dispatcher, handle.clone(), events, state));

        tracing::debug!("connection {} started", id);
        Self {
            handle,
            read_task,
            dispatch_task,
            writer_task,
        }
    }

    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.handle.id
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Wait for every task of the connection to finish.
    ///
    /// # Errors
    ///
    /// [`Error::TaskFailed`] if a loop panicked, for example inside the
    /// dispatcher.
    pub async fn wait_for_shutdown(self) -> Result<()> {
        let Self {
            handle,
            read_task,
            dispatch_task,
            writer_task,
        } = self;
        drop(handle);

        let dispatched = dispatch_task.await;
        read_task.await.map_err(task_failed)?;
        dispatched.map_err(task_failed)?;
        if let Err(e) = writer_task.await.map_err(task_failed)? {
            tracing::debug!("writer ended with: {}", e);
        }
        Ok(())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").field("handle", &self.handle).finish()
    }
}

fn task_failed(e: tokio::task::JoinError) -> Error {
    Error::TaskFailed(e.to_string())
}

/// Why the read loop stopped.
enum Exit {
    RemoteStop,
    RemoteClose(CloseInfo),
    Failed(Error),
    LocalStop(String),
    DispatchGone,
}

type Flow = ControlFlow<Exit>;

struct ReadLoop {
    id: ConnectionId,
    window: FlowWindow<Outbound>,
    keywords: KeywordRegistry,
    writer: WriterHandle,
    events: Chan<Envelope>,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl ReadLoop {
    async fn run(mut self, mut stream: BoxStream, mut commands: mpsc::UnboundedReceiver<Command>) {
        let opened = self
            .emit(Envelope::new(Operation::Open, control::open_payload(self.id)))
            .await;
        advance(&self.state, ConnectionState::Open);

        let exit = match opened {
            ControlFlow::Break(exit) => exit,
            ControlFlow::Continue(()) => loop {
                let flow = tokio::select! {
                    frame = stream.next() => self.on_frame(frame).await,
                    command = commands.recv() => match command {
                        Some(command) => self.on_command(command).await,
                        // Every handle is gone, the dispatch loop's included.
                        None => ControlFlow::Break(Exit::LocalStop("dropped".to_string())),
                    },
                };
                if let ControlFlow::Break(exit) = flow {
                    break exit;
                }
            },
        };

        self.finish(exit, commands).await;
    }

    async fn on_frame(&mut self, frame: Option<Result<WireMessage>>) -> Flow {
        let message = match frame {
            Some(Ok(WireMessage::Close(info))) => {
                return ControlFlow::Break(Exit::RemoteClose(info.unwrap_or_else(CloseInfo::normal)))
            }
            Some(Ok(message)) => message,
            Some(Err(Error::TransportClosed { code, reason })) => {
                return ControlFlow::Break(Exit::RemoteClose(CloseInfo::new(code, reason)))
            }
            Some(Err(e)) => return ControlFlow::Break(Exit::Failed(e)),
            None => {
                return ControlFlow::Break(Exit::RemoteClose(CloseInfo::new(
                    CLOSE_ABNORMAL,
                    "transport ended",
                )))
            }
        };

        match decode_message(&message) {
            Ok(Some(mut envelope)) => {
                envelope.payload.intern_keywords(&self.keywords);
                self.on_envelope(envelope).await
            }
            Ok(None) => ControlFlow::Continue(()),
            Err(e) => {
                tracing::warn!("connection {}: dropping bad frame: {}", self.id, e);
                ControlFlow::Continue(())
            }
        }
    }

    async fn on_envelope(&mut self, envelope: Envelope) -> Flow {
        match envelope.op {
            Operation::Set => match SetWindow::from_payload(&envelope.payload) {
                Ok(set) => {
                    tracing::debug!(
                        "connection {}: window set to {} (peer received {})",
                        self.id,
                        set.window_size,
                        set.received
                    );
                    self.window.on_set(set.window_size, set.received);
                    self.flush_deferred().await
                }
                Err(e) => {
                    tracing::warn!("connection {}: dropping bad set: {}", self.id, e);
                    ControlFlow::Continue(())
                }
            },
            Operation::Reset => {
                let peer = ResetWindow::from_payload(&envelope.payload);
                tracing::debug!(
                    "connection {}: window reset ({} deferred, peer sent {})",
                    self.id,
                    self.window.deferred_len(),
                    peer.sent
                );
                self.window.on_reset(0);
                self.emit(Envelope::new(Operation::BpResume, envelope.to_value()))
                    .await?;
                self.flush_deferred().await
            }
            Operation::Msg => {
                if self.window.on_receive() == ReceiveDecision::DeliverAndReset {
                    let ack = ResetWindow::default().to_envelope();
                    let sent = match encode_envelope(&ack, Encoding::Binary) {
                        Ok(frame) => self.writer.send(frame).await,
                        Err(e) => Err(e),
                    };
                    if let Err(e) = sent {
                        return ControlFlow::Break(Exit::Failed(e));
                    }
                }
                self.emit(Envelope::new(Operation::Msg, envelope.payload)).await
            }
            Operation::Stop => ControlFlow::Break(Exit::RemoteStop),
            other => {
                tracing::warn!(
                    "connection {}: unexpected {} from peer: {}",
                    self.id,
                    other,
                    envelope.payload
                );
                ControlFlow::Continue(())
            }
        }
    }

    async fn on_command(&mut self, command: Command) -> Flow {
        match command {
            Command::Send(out) => {
                let waiting = control::bpwait_payload(
                    &out.envelope.payload,
                    self.window.sent(),
                    out.encoding.name(),
                );
                match self.window.admit(out) {
                    Some(out) => self.transmit(out).await,
                    None => {
                        tracing::debug!(
                            "connection {}: window full, {} deferred",
                            self.id,
                            self.window.deferred_len()
                        );
                        self.emit(Envelope::new(Operation::BpWait, waiting)).await
                    }
                }
            }
            Command::Stats(reply) => {
                let _ = reply.send(self.window.stats());
                ControlFlow::Continue(())
            }
            Command::Stop(cause) => ControlFlow::Break(Exit::LocalStop(cause)),
        }
    }

    /// Hand an admitted message to the writer and report it as `sent`.
    async fn transmit(&mut self, out: Outbound) -> Flow {
        let Outbound {
            envelope,
            frame,
            reply,
            ..
        } = out;
        if let Err(e) = self.writer.send(frame).await {
            resolve(reply, Err(Error::ConnectionStopped));
            return ControlFlow::Break(Exit::Failed(e));
        }
        resolve(reply, Ok(()));
        let payload = control::sent_payload(&envelope, self.window.sent());
        self.emit(Envelope::new(Operation::Sent, payload)).await
    }

    /// Transmit deferred messages, oldest first, while the window has room.
    async fn flush_deferred(&mut self) -> Flow {
        while let Some(out) = self.window.pop_ready() {
            self.transmit(out).await?;
        }
        ControlFlow::Continue(())
    }

    async fn emit(&self, envelope: Envelope) -> Flow {
        match self.events.send(envelope).await {
            Ok(()) => ControlFlow::Continue(()),
            Err(_) => ControlFlow::Break(Exit::DispatchGone),
        }
    }

    async fn close_transport(&self) {
        let _ = self
            .writer
            .send(WireMessage::Close(Some(CloseInfo::normal())))
            .await;
    }

    async fn finish(mut self, exit: Exit, mut commands: mpsc::UnboundedReceiver<Command>) {
        advance(&self.state, ConnectionState::Closing);

        let cause = match exit {
            Exit::RemoteStop => {
                self.close_transport().await;
                "remote stop".to_string()
            }
            Exit::LocalStop(cause) => {
                self.close_transport().await;
                cause
            }
            Exit::RemoteClose(info) => {
                tracing::debug!(
                    "connection {}: closed by peer ({} {})",
                    self.id,
                    info.code,
                    info.reason
                );
                let _ = self.emit(Envelope::new(Operation::Close, info.to_payload())).await;
                "closed".to_string()
            }
            Exit::Failed(e) => {
                tracing::error!("connection {}: transport error: {}", self.id, e);
                let payload = control::error_payload(self.id, &e);
                let _ = self.emit(Envelope::new(Operation::Error, payload)).await;
                "error".to_string()
            }
            Exit::DispatchGone => "dispatcher gone".to_string(),
        };

        // Nothing queued from here on will be transmitted.
        let deferred = self.window.deferred_len();
        for out in self.window.drain_deferred() {
            out.fail();
        }
        commands.close();
        while let Ok(command) = commands.try_recv() {
            match command {
                Command::Send(out) => out.fail(),
                Command::Stats(reply) => {
                    let _ = reply.send(self.window.stats());
                }
                Command::Stop(_) => {}
            }
        }

        let _ = self
            .emit(Envelope::new(Operation::Stop, control::stop_payload(self.id, &cause)))
            .await;
        tracing::debug!(
            "connection {}: read loop exit ({}), {} deferred dropped",
            self.id,
            cause,
            deferred
        );
    }
}

/// Closes the channel and marks the connection closed, also on unwind.
struct DispatchGuard {
    events: Chan<Envelope>,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        self.events.close();
        advance(&self.state, ConnectionState::Closed);
    }
}

async fn dispatch_loop<D: Dispatcher>(
    mut dispatcher: D,
    handle: ConnectionHandle,
    events: Chan<Envelope>,
    state: Arc<watch::Sender<ConnectionState>>,
) {
    let _guard = DispatchGuard {
        events: events.clone(),
        state,
    };

    while let Some(envelope) = events.recv().await {
        let last = envelope.op == Operation::Stop;
        dispatcher.dispatch(&handle, envelope.op, envelope.payload);
        if last {
            break;
        }
    }
    tracing::debug!("connection {}: dispatch loop exit", handle.id);
}
