//! Flow-control messages and notification payloads.
//!
//! The peer announces its window with `set` and re-opens it with `reset`:
//! ```text
//! {:op :set,   :payload {:bpsize W, :msgrcv N}}
//! {:op :reset, :payload {:msgsnt 0}}
//! ```
//! The remaining builders shape the payloads of the notifications the
//! connection pushes to its dispatcher.

use crate::error::{Error, Result};
use crate::value::Value;

use super::{Envelope, Operation};

/// Payload key carrying the announced window size.
pub const BPSIZE: &str = "bpsize";
/// Payload key carrying a received-message count.
pub const MSGRCV: &str = "msgrcv";
/// Payload key carrying a sent-message count.
pub const MSGSNT: &str = "msgsnt";

/// Normal websocket closure code.
pub const CLOSE_NORMAL: u16 = 1000;
/// Closure code for a link that ended without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

fn count_field(payload: &Value, key: &str, op: Operation) -> Result<usize> {
    payload
        .get(key)
        .and_then(Value::as_i64)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| {
            Error::MalformedEnvelope(format!("{op} payload has no count '{key}': {payload}"))
        })
}

/// `set` payload: the peer's window size and its received count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetWindow {
    pub window_size: usize,
    pub received: usize,
}

impl SetWindow {
    pub fn from_payload(payload: &Value) -> Result<Self> {
        Ok(Self {
            window_size: count_field(payload, BPSIZE, Operation::Set)?,
            received: count_field(payload, MSGRCV, Operation::Set).unwrap_or(0),
        })
    }

    pub fn to_envelope(&self) -> Envelope {
        Envelope::new(
            Operation::Set,
            Value::map()
                .kw(BPSIZE, self.window_size)
                .kw(MSGRCV, self.received)
                .build(),
        )
    }
}

/// `reset` payload: the sent count the receiver of the reset should adopt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResetWindow {
    pub sent: usize,
}

impl ResetWindow {
    /// Missing or unreadable counts are treated as zero.
    pub fn from_payload(payload: &Value) -> Self {
        Self {
            sent: count_field(payload, MSGSNT, Operation::Reset).unwrap_or(0),
        }
    }

    pub fn to_envelope(&self) -> Envelope {
        Envelope::new(
            Operation::Reset,
            Value::map().kw(MSGSNT, self.sent).build(),
        )
    }
}

/// Closure details of a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

impl CloseInfo {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn normal() -> Self {
        Self::new(CLOSE_NORMAL, "")
    }

    /// `close` notification payload.
    pub fn to_payload(&self) -> Value {
        Value::map()
            .str("code", u32::from(self.code))
            .str("reason", self.reason.as_str())
            .build()
    }
}

/// `open` notification payload.
pub fn open_payload(connection: u64) -> Value {
    Value::map()
        .str("connection", Value::Integer(connection as i64))
        .build()
}

/// `sent` notification payload: the transmitted envelope and the new count.
pub fn sent_payload(msg: &Envelope, sent: usize) -> Value {
    Value::map()
        .kw("msg", msg.to_value())
        .kw(MSGSNT, sent)
        .build()
}

/// `bpwait` notification payload: the deferred message and its encoding.
pub fn bpwait_payload(msg: &Value, sent: usize, encode: &str) -> Value {
    Value::map()
        .kw("msg", msg.clone())
        .str("encode", encode)
        .kw(MSGSNT, sent)
        .build()
}

/// `error` notification payload.
pub fn error_payload(connection: u64, err: &Error) -> Value {
    Value::map()
        .str("connection", Value::Integer(connection as i64))
        .str("err", err.to_string())
        .build()
}

/// `stop` notification payload.
pub fn stop_payload(connection: u64, cause: &str) -> Value {
    Value::map()
        .str("connection", Value::Integer(connection as i64))
        .str("cause", cause)
        .build()
}
