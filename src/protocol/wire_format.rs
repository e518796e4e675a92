//! Envelope wire format.
//!
//! Every frame on the wire is one envelope, rendered as a two-entry map:
//! ```text
//! { :op <keyword tag>, :payload <any value> }
//! ```
//! Binary frames use keyword keys and keyword tags (MsgPack extension type
//! 3); text frames carry the same shape with plain string names. Decoding
//! accepts either key style.

use std::fmt;

use crate::error::{Error, Result};
use crate::keyword::Keyword;
use crate::value::Value;

/// Envelope key holding the operation tag.
pub const OP_KEY: &str = "op";

/// Envelope key holding the payload.
pub const PAYLOAD_KEY: &str = "payload";

/// Closed set of envelope operations.
///
/// The first eight are delivered to the [`Dispatcher`](crate::handler::Dispatcher);
/// `Set` and `Reset` are flow-control messages consumed by the connection's
/// read loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Open,
    Close,
    Msg,
    Sent,
    Error,
    BpWait,
    BpResume,
    Stop,
    Set,
    Reset,
}

impl Operation {
    /// Every operation, in tag order.
    pub const ALL: [Operation; 10] = [
        Operation::Open,
        Operation::Close,
        Operation::Msg,
        Operation::Sent,
        Operation::Error,
        Operation::BpWait,
        Operation::BpResume,
        Operation::Stop,
        Operation::Set,
        Operation::Reset,
    ];

    /// Wire name of the tag.
    pub fn name(self) -> &'static str {
        match self {
            Operation::Open => "open",
            Operation::Close => "close",
            Operation::Msg => "msg",
            Operation::Sent => "sent",
            Operation::Error => "error",
            Operation::BpWait => "bpwait",
            Operation::BpResume => "bpresume",
            Operation::Stop => "stop",
            Operation::Set => "set",
            Operation::Reset => "reset",
        }
    }

    /// Parse a wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }

    /// The tag as a keyword.
    pub fn keyword(self) -> Keyword {
        Keyword::new(self.name())
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.name())
    }
}

/// The `(operation, payload)` unit exchanged internally and on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub op: Operation,
    pub payload: Value,
}

impl Envelope {
    pub fn new(op: Operation, payload: impl Into<Value>) -> Self {
        Self {
            op,
            payload: payload.into(),
        }
    }

    /// An application message envelope.
    pub fn msg(payload: impl Into<Value>) -> Self {
        Self::new(Operation::Msg, payload)
    }

    /// Render as the `{:op .., :payload ..}` map.
    pub fn to_value(&self) -> Value {
        Value::map()
            .kw(OP_KEY, self.op.keyword())
            .kw(PAYLOAD_KEY, self.payload.clone())
            .build()
    }

    /// Parse a decoded frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedEnvelope`] if the value is not a map, lacks
    /// `op` or `payload`, or names an unknown operation.
    pub fn from_value(value: Value) -> Result<Self> {
        if !matches!(value, Value::Map(_)) {
            return Err(Error::MalformedEnvelope(format!(
                "expected a map, got {value}"
            )));
        }

        let op_name = value
            .get(OP_KEY)
            .and_then(Value::key_name)
            .ok_or_else(|| Error::MalformedEnvelope(format!("no 'op' field: {value}")))?;

        let op = Operation::from_name(op_name)
            .ok_or_else(|| Error::MalformedEnvelope(format!("unknown operation :{op_name}")))?;

        let payload = value
            .get(PAYLOAD_KEY)
            .cloned()
            .ok_or_else(|| Error::MalformedEnvelope(format!("no 'payload' field: {value}")))?;

        Ok(Self { op, payload })
    }
}
