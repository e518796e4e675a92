//! Dispatch table mapping operations to handlers.
//!
//! At most one handler is registered per operation; registering again
//! replaces the previous one. Operations without a handler are logged and
//! dropped, never treated as fatal.

use std::collections::HashMap;
use std::fmt;

use super::Dispatcher;
use crate::connection::ConnectionHandle;
use crate::protocol::Operation;
use crate::value::Value;

/// Handler for one operation.
pub type OpHandler = Box<dyn FnMut(&ConnectionHandle, Value) + Send>;

/// A [`Dispatcher`] built from per-operation handlers.
#[derive(Default)]
pub struct DispatchTable {
    handlers: HashMap<Operation, OpHandler>,
    /// Count of envelopes that had no handler.
    unhandled: u64,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`register`](Self::register).
    pub fn on<F>(mut self, op: Operation, handler: F) -> Self
    where
        F: FnMut(&ConnectionHandle, Value) + Send + 'static,
    {
        self.register(op, handler);
        self
    }

    /// Register the handler for `op`, replacing any earlier one.
    pub fn register<F>(&mut self, op: Operation, handler: F)
    where
        F: FnMut(&ConnectionHandle, Value) + Send + 'static,
    {
        self.handlers.insert(op, Box::new(handler));
    }

    /// Remove the handler for `op`.
    pub fn unregister(&mut self, op: Operation) -> bool {
        self.handlers.remove(&op).is_some()
    }

    pub fn handles(&self, op: Operation) -> bool {
        self.handlers.contains_key(&op)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Envelopes dropped for lack of a handler so far.
    pub fn unhandled(&self) -> u64 {
        self.unhandled
    }
}

impl Dispatcher for DispatchTable {
    fn dispatch(&mut self, conn: &ConnectionHandle, op: Operation, payload: Value) {
        match self.handlers.get_mut(&op) {
            Some(handler) => handler(conn, payload),
            None => {
                self.unhandled += 1;
                tracing::warn!("connection {}: no handler for {} {}", conn.id(), op, payload);
            }
        }
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ops: Vec<_> = self.handlers.keys().map(|op| op.name()).collect();
        ops.sort_unstable();
        f.debug_struct("DispatchTable")
            .field("ops", &ops)
            .field("unhandled", &self.unhandled)
            .finish()
    }
}
