//! MsgPack codec using `rmp-serde`.
//!
//! Always encodes with `to_vec_named` so any struct payloads travel as maps
//! keyed by field name, which is what the job server's decoder expects.
//! Keywords inside values are carried as extension type 3 (see
//! [`Keyword`](crate::keyword::Keyword)).
//!
//! # Example
//!
//! ```
//! use aerobio_client::codec::MsgPackCodec;
//! use aerobio_client::keyword::Keyword;
//!
//! let encoded = MsgPackCodec::encode(&Keyword::new("launch")).unwrap();
//! let decoded: Keyword = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, Keyword::new("launch"));
//! ```

use crate::error::Result;

/// MessagePack codec for binary frames.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyword::Keyword;
    use crate::value::Value;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct JobStatus {
        eid: String,
        phase: u32,
        done: bool,
    }

    #[test]
    fn test_struct_encodes_as_map() {
        let status = JobStatus {
            eid: "exp-7".to_string(),
            phase: 2,
            done: false,
        };

        let encoded = MsgPackCodec::encode(&status).unwrap();
        // fixmap with 3 entries, not fixarray
        assert_eq!(encoded[0], 0x83);

        let decoded: JobStatus = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, status);

        // The same bytes read as a dynamic value keep their field names.
        let value: Value = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(value.get("eid").and_then(Value::as_str), Some("exp-7"));
    }

    #[test]
    fn test_keyword_inside_collections() {
        let tags = vec![Keyword::new("run"), Keyword::new("compare")];
        let encoded = MsgPackCodec::encode(&tags).unwrap();
        // fixarray with 2 elements
        assert_eq!(encoded[0], 0x92);
        let decoded: Vec<Keyword> = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, tags);
    }

    #[test]
    fn test_nil() {
        let encoded = MsgPackCodec::encode(&Value::Nil).unwrap();
        assert_eq!(encoded, vec![0xc0]);
        let decoded: Value = MsgPackCodec::decode(&encoded).unwrap();
        assert!(decoded.is_nil());
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        // 0xc1 is never used in MsgPack
        let result: Result<Value> = MsgPackCodec::decode(&[0xc1]);
        assert!(result.is_err());
    }
}
