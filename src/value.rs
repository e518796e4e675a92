//! Dynamic payload values.
//!
//! Envelope payloads are schemaless: the job server sends maps whose keys
//! may be keywords or strings, nested arrays, numbers and binary blobs.
//! [`Value`] models that shape and carries keywords through both the MsgPack
//! and the JSON encodings.

use std::fmt;

use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

use crate::keyword::{Keyword, KeywordRegistry};

/// A dynamically typed payload value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    /// Raw bytes. Text frames carry these as an array of numbers, which
    /// decodes back as [`Value::Array`]; use binary frames to keep them.
    Binary(Vec<u8>),
    Keyword(Keyword),
    Array(Vec<Value>),
    /// Ordered map; keys may be any value, typically keywords or strings.
    Map(Vec<(Value, Value)>),
}

impl Value {
    /// Start building a map value.
    pub fn map() -> MapBuilder {
        MapBuilder::default()
    }

    /// Look up a map entry.
    ///
    /// A keyword key and a string key with the same name are treated as the
    /// same key, so `get("op")` finds both `:op` and `"op"`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries
                .iter()
                .find(|(k, _)| k.key_name() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Name of a keyword or string, as used for map-key matching.
    pub fn key_name(&self) -> Option<&str> {
        match self {
            Value::Keyword(kw) => Some(kw.name()),
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_keyword(&self) -> Option<&Keyword> {
        match self {
            Value::Keyword(kw) => Some(kw),
            _ => None,
        }
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Replace every keyword, including map keys, with its interned
    /// instance from `registry`.
    pub fn intern_keywords(&mut self, registry: &KeywordRegistry) {
        match self {
            Value::Keyword(kw) => *kw = registry.intern_keyword(kw),
            Value::Array(items) => {
                for item in items {
                    item.intern_keywords(registry);
                }
            }
            Value::Map(entries) => {
                for (key, value) in entries {
                    key.intern_keywords(registry);
                    value.intern_keywords(registry);
                }
            }
            _ => {}
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Binary(b) => write!(f, "#bytes[{}]", b.len()),
            Value::Keyword(kw) => write!(f, "{kw}"),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Map(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k} {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

/// Fluent builder for [`Value::Map`].
#[derive(Debug, Default)]
pub struct MapBuilder {
    entries: Vec<(Value, Value)>,
}

impl MapBuilder {
    /// Add an entry keyed by a keyword.
    pub fn kw(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.entries
            .push((Value::Keyword(Keyword::new(key)), value.into()));
        self
    }

    /// Add an entry keyed by a string.
    pub fn str(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.entries
            .push((Value::String(key.to_string()), value.into()));
        self
    }

    pub fn build(self) -> Value {
        Value::Map(self.entries)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v.into())
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Integer(v.into())
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        i64::try_from(v)
            .map(Value::Integer)
            .unwrap_or(Value::Float(v as f64))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Keyword> for Value {
    fn from(v: Keyword) -> Self {
        Value::Keyword(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Nil)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Nil => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Integer(n) => serializer.serialize_i64(*n),
            Value::Float(x) => serializer.serialize_f64(*x),
            Value::String(s) => serializer.serialize_str(s),
            Value::Binary(b) => serializer.serialize_bytes(b),
            Value::Keyword(kw) => kw.serialize(serializer),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("any MsgPack or JSON value")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Nil)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Nil)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Value, D::Error> {
        Value::deserialize(d)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Integer(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        Ok(i64::try_from(v)
            .map(Value::Integer)
            .unwrap_or(Value::Float(v as f64)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::String(v))
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Value, E> {
        Ok(Value::Binary(v.to_vec()))
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Value, E> {
        Ok(Value::Binary(v))
    }

    // MsgPack extension values arrive as a newtype wrapping (type, data).
    fn visit_newtype_struct<D: Deserializer<'de>>(self, d: D) -> Result<Value, D::Error> {
        let (tag, data): (i8, serde_bytes::ByteBuf) = Deserialize::deserialize(d)?;
        match Keyword::from_ext(tag, &data) {
            Some(kw) => Ok(Value::Keyword(kw)),
            None => Err(de::Error::custom(format!(
                "unsupported extension type {tag}"
            ))),
        }
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Value, A::Error> {
        let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
        while let Some((k, v)) = map.next_entry()? {
            entries.push((k, v));
        }
        Ok(Value::Map(entries))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        Value::map()
            .kw("op", Keyword::new("msg"))
            .kw(
                "payload",
                Value::map()
                    .str("data", "hello")
                    .kw("count", 3)
                    .kw("tags", vec![Value::from("a"), Value::Nil])
                    .build(),
            )
            .build()
    }

    #[test]
    fn test_get_matches_keyword_and_string_keys() {
        let v = sample();
        assert_eq!(v.get("op"), Some(&Value::Keyword(Keyword::new("msg"))));
        let payload = v.get("payload").unwrap();
        assert_eq!(payload.get("data").and_then(Value::as_str), Some("hello"));
        assert_eq!(payload.get("count").and_then(Value::as_i64), Some(3));
        assert!(payload.get("missing").is_none());
        assert!(Value::Integer(1).get("op").is_none());
    }

    #[test]
    fn test_intern_keywords_reaches_nested_keys_and_values() {
        let registry = KeywordRegistry::new();
        let op = registry.intern("op");
        let mut v = sample();
        v.intern_keywords(&registry);

        let Value::Map(entries) = &v else {
            panic!("expected a map");
        };
        assert!(entries[0].0.as_keyword().unwrap().ptr_eq(&op));
        let msg = v.get("op").and_then(Value::as_keyword).unwrap();
        assert!(msg.ptr_eq(&registry.intern("msg")));
        // op, msg, payload, count, tags
        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn test_msgpack_preserves_keywords() {
        let v = sample();
        let encoded = rmp_serde::to_vec_named(&v).unwrap();
        let decoded: Value = rmp_serde::from_slice(&encoded).unwrap();
        assert_eq!(decoded, v);
    }

    #[test]
    fn test_json_renders_keywords_as_names() {
        let v = sample();
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(
            json,
            r#"{"op":"msg","payload":{"data":"hello","count":3,"tags":["a",null]}}"#
        );
        let decoded: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.get("op").and_then(Value::as_str), Some("msg"));
    }

    #[test]
    fn test_binary_and_large_unsigned() {
        let encoded = rmp_serde::to_vec(&Value::Binary(vec![1, 2, 3])).unwrap();
        assert_eq!(encoded[0], 0xc4);
        let decoded: Value = rmp_serde::from_slice(&encoded).unwrap();
        assert_eq!(decoded, Value::Binary(vec![1, 2, 3]));

        let big = rmp_serde::to_vec(&u64::MAX).unwrap();
        let decoded: Value = rmp_serde::from_slice(&big).unwrap();
        assert!(matches!(decoded, Value::Float(_)));
    }

    #[test]
    fn test_binary_over_json_becomes_array() {
        let json = serde_json::to_string(&Value::Binary(vec![1, 2, 3])).unwrap();
        assert_eq!(json, "[1,2,3]");
        let decoded: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(
            decoded,
            Value::Array(vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)])
        );
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        // fixext1, type 9, one data byte
        let result: std::result::Result<Value, _> = rmp_serde::from_slice(&[0xd4, 0x09, 0x00]);
        assert!(result.is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(sample().to_string(), r#"{:op :msg, :payload {"data" "hello", :count 3, :tags ["a" nil]}}"#);
    }
}
