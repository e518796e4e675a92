//! Handler module - application-side dispatch of connection envelopes.
//!
//! Provides:
//! - [`Dispatcher`] - the callback a connection's dispatch loop invokes
//! - [`DispatchTable`] - one handler per [`Operation`](crate::protocol::Operation)
//! - [`LoggingDispatcher`] - logs every envelope
//!
//! # Example
//!
//! ```ignore
//! use aerobio_client::handler::DispatchTable;
//! use aerobio_client::protocol::Operation;
//!
//! let table = DispatchTable::new()
//!     .on(Operation::Msg, |conn, payload| {
//!         println!("connection {} got {}", conn.id(), payload);
//!     })
//!     .on(Operation::Stop, |_conn, payload| {
//!         println!("stopped: {}", payload);
//!     });
//! ```

mod dispatcher;
mod registry;

pub use dispatcher::{Dispatcher, LoggingDispatcher};
pub use registry::{DispatchTable, OpHandler};
