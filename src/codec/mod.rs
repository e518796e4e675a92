//! Codec module - serialization of envelopes for the wire.
//!
//! Two encodings share one envelope shape:
//!
//! - [`MsgPackCodec`] - binary frames; keywords travel as extension type 3
//! - [`JsonCodec`] - text frames; keywords travel as plain names and
//!   binary blobs as arrays of numbers
//!
//! # Example
//!
//! ```
//! use aerobio_client::codec::{decode_message, encode_envelope, Encoding};
//! use aerobio_client::protocol::{Envelope, Operation};
//!
//! let env = Envelope::msg("hello");
//! let frame = encode_envelope(&env, Encoding::Binary).unwrap();
//! let decoded = decode_message(&frame).unwrap().unwrap();
//! assert_eq!(decoded.op, Operation::Msg);
//! assert_eq!(decoded, env);
//! ```

mod json;
mod msgpack;

use std::fmt;

use bytes::Bytes;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;

use crate::error::Result;
use crate::protocol::Envelope;
use crate::transport::WireMessage;
use crate::value::Value;

/// Frame encoding used for outbound envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// MsgPack in binary frames.
    #[default]
    Binary,
    /// JSON in text frames.
    Text,
}

impl Encoding {
    pub fn name(self) -> &'static str {
        match self {
            Encoding::Binary => "binary",
            Encoding::Text => "text",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Encode an envelope into a wire frame.
pub fn encode_envelope(envelope: &Envelope, encoding: Encoding) -> Result<WireMessage> {
    let value = envelope.to_value();
    Ok(match encoding {
        Encoding::Binary => WireMessage::Binary(Bytes::from(MsgPackCodec::encode(&value)?)),
        Encoding::Text => WireMessage::Text(JsonCodec::encode(&value)?),
    })
}

/// Decode a data frame into an envelope.
///
/// Returns `Ok(None)` for close frames, which carry no envelope.
///
/// # Errors
///
/// Codec errors if the frame does not parse, and
/// [`Error::MalformedEnvelope`](crate::Error::MalformedEnvelope) if it parses
/// but lacks an `op` or `payload`.
pub fn decode_message(message: &WireMessage) -> Result<Option<Envelope>> {
    let value: Value = match message {
        WireMessage::Binary(bytes) => MsgPackCodec::decode(bytes)?,
        WireMessage::Text(text) => JsonCodec::decode(text)?,
        WireMessage::Close(_) => return Ok(None),
    };
    Envelope::from_value(value).map(Some)
}
