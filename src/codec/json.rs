//! JSON codec for text frames.
//!
//! Keywords render as their bare names, so a text frame reads as an
//! ordinary JSON object: `{"op":"msg","payload":...}`.

use crate::error::Result;

/// JSON codec for text frames.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a value to a JSON string.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<String> {
        Ok(serde_json::to_string(value)?)
    }

    /// Decode a JSON string to a value.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(text: &str) -> Result<T> {
        Ok(serde_json::from_str(text)?)
    }
}
