//! The dispatcher contract.

use crate::connection::ConnectionHandle;
use crate::protocol::Operation;
use crate::value::Value;

/// Receives every envelope a connection delivers, in order.
///
/// Called from the connection's dispatch loop, one envelope at a time. The
/// operations delivered are `open`, `msg`, `sent`, `bpwait`, `bpresume`,
/// `close`, `error` and, last of all, `stop`. Implementations must not
/// block for long: the read loop stalls once the connection's internal
/// channel is full. Use [`ConnectionHandle::queue_msg`] to reply from here,
/// or spawn a task that awaits [`ConnectionHandle::send_msg`].
pub trait Dispatcher: Send + 'static {
    fn dispatch(&mut self, conn: &ConnectionHandle, op: Operation, payload: Value);
}

impl<F> Dispatcher for F
where
    F: FnMut(&ConnectionHandle, Operation, Value) + Send + 'static,
{
    fn dispatch(&mut self, conn: &ConnectionHandle, op: Operation, payload: Value) {
        self(conn, op, payload)
    }
}

/// Logs every envelope at `info` level and otherwise ignores it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingDispatcher;

impl Dispatcher for LoggingDispatcher {
    fn dispatch(&mut self, conn: &ConnectionHandle, op: Operation, payload: Value) {
        tracing::info!("connection {} {} {}", conn.id(), op, payload);
    }
}
