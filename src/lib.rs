//! # aerobio-client
//!
//! Async client core for the Aerobio job server.
//!
//! The crate provides Go-style concurrency primitives and a websocket
//! connection with windowed flow control on top of them.
//!
//! ## Architecture
//!
//! - **Primitives** ([`sync`]): [`Chan`] with rendezvous, bounded and
//!   unbounded buffering, multi-way [`select`], and a background
//!   [`Scheduler`]
//! - **Connection** ([`connection`]): a read loop owning the flow-control
//!   window, a dispatch loop feeding the application's [`Dispatcher`], and
//!   a writer task owning the transport
//! - **Wire** ([`protocol`], [`codec`]): `{op, payload}` envelopes in
//!   MsgPack (binary) or JSON (text) frames
//!
//! ## Example
//!
//! ```ignore
//! use aerobio_client::{open_connection, ConnectionHandle, Operation, Value};
//!
//! #[tokio::main]
//! async fn main() -> aerobio_client::Result<()> {
//!     let client = open_connection(
//!         "ws://localhost:8765/ws",
//!         |conn: &ConnectionHandle, op: Operation, payload: Value| {
//!             println!("{} {} {}", conn.id(), op, payload);
//!         },
//!     )
//!     .await?;
//!
//!     client.send_msg(Value::map().kw("cmd", "check").build()).await?;
//!     client.wait_for_shutdown().await
//! }
//! ```

pub mod codec;
pub mod connection;
pub mod error;
pub mod handler;
pub mod keyword;
pub mod protocol;
pub mod registry;
pub mod sync;
pub mod transport;
pub mod value;
pub mod writer;

mod client;

pub use client::{open_connection, AppTask, Client, ClientBuilder};
pub use codec::Encoding;
pub use connection::{Connection, ConnectionConfig, ConnectionHandle, ConnectionId, ConnectionState};
pub use error::{Error, Result};
pub use handler::{DispatchTable, Dispatcher, LoggingDispatcher};
pub use keyword::{Keyword, KeywordRegistry};
pub use protocol::{Envelope, FlowStats, Operation};
pub use registry::ConnectionRegistry;
pub use sync::{select, Capacity, Chan, Scheduler, SchedulerConfig, Selection, TaskHandle};
pub use value::Value;
