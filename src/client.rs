//! Client builder and connection lifecycle.
//!
//! The [`ClientBuilder`] collects the server url, the dispatcher and the
//! connection settings. Connecting:
//! 1. Dial the websocket (or take a ready [`Transport`])
//! 2. Open the connection; the dispatcher receives `open`
//! 3. Register it with the [`ConnectionRegistry`]
//! 4. After `open_delay`, start the application task with the handle
//!
//! # Example
//!
//! ```ignore
//! use aerobio_client::{Client, ConnectionHandle, Operation, Value};
//!
//! #[tokio::main]
//! async fn main() -> aerobio_client::Result<()> {
//!     let client = Client::builder()
//!         .url("ws://localhost:8765/ws")
//!         .dispatcher(|conn: &ConnectionHandle, op: Operation, payload: Value| {
//!             if op == Operation::Msg {
//!                 println!("{}: {}", conn.id(), payload);
//!             }
//!         })
//!         .app_task(|conn| async move {
//!             let _ = conn.send_msg(Value::map().kw("cmd", "check").build()).await;
//!         })
//!         .connect()
//!         .await?;
//!
//!     client.wait_for_shutdown().await
//! }
//! ```

use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::task::JoinHandle;

use crate::codec::Encoding;
use crate::connection::{Connection, ConnectionConfig, ConnectionHandle, ConnectionId};
use crate::error::{Error, Result};
use crate::handler::{Dispatcher, LoggingDispatcher};
use crate::keyword::KeywordRegistry;
use crate::protocol::Operation;
use crate::registry::ConnectionRegistry;
use crate::transport::{websocket, Transport};
use crate::value::Value;

/// Application task started once a connection is open.
pub type AppTask = Box<dyn FnOnce(ConnectionHandle) -> BoxFuture<'static, ()> + Send>;

type BoxDispatcher = Box<dyn Dispatcher>;

/// Builder for configuring and connecting a client.
pub struct ClientBuilder {
    url: Option<String>,
    dispatcher: Option<BoxDispatcher>,
    config: ConnectionConfig,
    app_task: Option<AppTask>,
    registry: ConnectionRegistry,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            url: None,
            dispatcher: None,
            config: ConnectionConfig::default(),
            app_task: None,
            registry: ConnectionRegistry::new(),
        }
    }

    /// Server address, e.g. `ws://localhost:8765/ws`.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Receiver of the connection's envelopes.
    ///
    /// Default: [`LoggingDispatcher`]
    pub fn dispatcher<D: Dispatcher>(mut self, dispatcher: D) -> Self {
        self.dispatcher = Some(Box::new(dispatcher));
        self
    }

    /// Replace the whole connection configuration.
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Capacity of the internal envelope channel.
    ///
    /// Default: 19
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// Encoding of outbound messages.
    ///
    /// Default: binary
    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.config.encoding = encoding;
        self
    }

    /// Writer queue capacity.
    ///
    /// Default: 1024
    pub fn writer_capacity(mut self, capacity: usize) -> Self {
        self.config.writer_capacity = capacity;
        self
    }

    /// Delay between opening the connection and starting the app task.
    ///
    /// Default: 100ms
    pub fn open_delay(mut self, delay: Duration) -> Self {
        self.config.open_delay = delay;
        self
    }

    /// Task to run with the connection handle once it is open.
    ///
    /// It is aborted if still running when the connection closes.
    pub fn app_task<F, Fut>(mut self, task: F) -> Self
    where
        F: FnOnce(ConnectionHandle) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.app_task = Some(Box::new(move |conn| task(conn).boxed()));
        self
    }

    /// Share a connection registry between clients.
    pub fn registry(mut self, registry: ConnectionRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Share a keyword registry between clients.
    ///
    /// Keywords decoded by the connection are interned through it.
    pub fn keywords(mut self, keywords: KeywordRegistry) -> Self {
        self.config.keywords = keywords;
        self
    }

    /// Dial the configured url and open the connection.
    ///
    /// # Errors
    ///
    /// [`Error::Transport`] if no url is set or the dial fails.
    pub async fn connect(self) -> Result<Client> {
        let url = self
            .url
            .clone()
            .ok_or_else(|| Error::Transport("no url configured".to_string()))?;
        let transport = websocket::connect(&url).await?;
        Ok(self.connect_with(transport))
    }

    /// Open the connection over an established transport.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect_with(self, transport: Transport) -> Client {
        let mut dispatcher = self
            .dispatcher
            .unwrap_or_else(|| Box::new(LoggingDispatcher) as BoxDispatcher);
        let connection = Connection::open(
            transport,
            move |conn: &ConnectionHandle, op: Operation, payload: Value| {
                dispatcher.dispatch(conn, op, payload)
            },
            self.config.clone(),
        );

        let handle = connection.handle();
        self.registry.track(handle.clone());
        tracing::debug!(
            "client connection {} open ({})",
            handle.id(),
            self.url.as_deref().unwrap_or("in-process")
        );

        let app_task = self.app_task.map(|task| {
            let delay = self.config.open_delay;
            let handle = handle.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if !handle.is_closed() {
                    task(handle).await;
                }
            })
        });

        Client {
            connection,
            app_task,
            registry: self.registry,
            keywords: self.config.keywords,
        }
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A client with one open connection.
pub struct Client {
    connection: Connection,
    app_task: Option<JoinHandle<()>>,
    registry: ConnectionRegistry,
    keywords: KeywordRegistry,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.connection.handle()
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn keywords(&self) -> &KeywordRegistry {
        &self.keywords
    }

    /// See [`ConnectionHandle::send_msg`].
    pub async fn send_msg(&self, payload: impl Into<Value>) -> Result<()> {
        self.connection.handle().send_msg(payload).await
    }

    pub fn stop(&self) {
        self.connection.handle().stop();
    }

    /// Wait until the connection is closed.
    ///
    /// This consumes the client. An app task still running at that point is
    /// aborted.
    pub async fn wait_for_shutdown(self) -> Result<()> {
        let result = self.connection.wait_for_shutdown().await;
        if let Some(task) = self.app_task {
            if !task.is_finished() {
                task.abort();
            }
            match task.await {
                Err(e) if e.is_panic() => return Err(Error::TaskFailed(e.to_string())),
                _ => {}
            }
        }
        result
    }
}

/// Dial `url` and open a connection dispatching to `dispatcher`.
pub async fn open_connection<D: Dispatcher>(url: &str, dispatcher: D) -> Result<Client> {
    ClientBuilder::new().url(url).dispatcher(dispatcher).connect().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_message, encode_envelope};
    use crate::protocol::SetWindow;
    use futures::{SinkExt, StreamExt};

    #[test]
    fn test_builder_configuration() {
        let builder = Client::builder()
            .url("ws://localhost:8765/ws")
            .channel_capacity(4)
            .encoding(Encoding::Text)
            .writer_capacity(16)
            .open_delay(Duration::from_millis(5));

        assert_eq!(builder.url.as_deref(), Some("ws://localhost:8765/ws"));
        assert_eq!(builder.config.channel_capacity, 4);
        assert_eq!(builder.config.encoding, Encoding::Text);
        assert_eq!(builder.config.writer_capacity, 16);
        assert_eq!(builder.config.open_delay, Duration::from_millis(5));
        assert!(builder.dispatcher.is_none());
        assert!(builder.app_task.is_none());
    }

    #[tokio::test]
    async fn test_connect_without_url() {
        let err = ClientBuilder::new().connect().await.err().unwrap();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn test_app_task_runs_after_open() {
        let (local, mut peer) = Transport::memory_pair(16);
        let client = Client::builder()
            .dispatcher(|_: &ConnectionHandle, _: Operation, _: Value| {})
            .open_delay(Duration::from_millis(10))
            .app_task(|conn| async move {
                conn.send_msg("hello").await.unwrap();
            })
            .connect_with(local);

        assert!(client.registry().contains(client.id()));

        let set = SetWindow {
            window_size: 3,
            received: 0,
        };
        peer.sink
            .send(encode_envelope(&set.to_envelope(), Encoding::Binary).unwrap())
            .await
            .unwrap();

        let frame = peer.stream.next().await.unwrap().unwrap();
        let envelope = decode_message(&frame).unwrap().unwrap();
        assert_eq!(envelope.op, Operation::Msg);
        assert_eq!(envelope.payload, Value::from("hello"));

        client.stop();
        let registry = client.registry().clone();
        client.wait_for_shutdown().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), async {
            while !registry.is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }
}
