//! Interned symbolic tokens.
//!
//! A [`Keyword`] is a name-equality token used both as a map key inside
//! payloads and as the operation tag of an envelope. On binary (MsgPack)
//! wires a keyword travels as extension type [`KEYWORD_EXT_TYPE`] whose data
//! is the MsgPack encoding of the name string; human-readable formats
//! (JSON) carry the bare name.
//!
//! # Example
//!
//! ```
//! use aerobio_client::keyword::{Keyword, KeywordRegistry};
//!
//! let registry = KeywordRegistry::new();
//! let op = registry.intern("op");
//! assert_eq!(op, Keyword::new("op"));
//! assert_eq!(op.to_string(), ":op");
//! ```

use std::borrow::Borrow;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::{self, Deserializer, Visitor};
use serde::ser::{self, Serializer};
use serde::{Deserialize, Serialize};

/// MsgPack extension type code reserved for keywords.
pub const KEYWORD_EXT_TYPE: i8 = 3;

/// Immutable symbolic token. Two keywords are equal iff their names are.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Keyword(Arc<str>);

impl Keyword {
    /// Create a keyword without interning.
    pub fn new(name: impl AsRef<str>) -> Self {
        Keyword(Arc::from(name.as_ref()))
    }

    /// The keyword's name, without the leading colon.
    #[inline]
    pub fn name(&self) -> &str {
        &self.0
    }

    /// Whether both keywords share one interned name.
    #[inline]
    pub fn ptr_eq(&self, other: &Keyword) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Decode a keyword from a MsgPack extension value.
    ///
    /// Returns `None` if `tag` is not [`KEYWORD_EXT_TYPE`] or the data is not
    /// a MsgPack string.
    pub fn from_ext(tag: i8, data: &[u8]) -> Option<Self> {
        if tag != KEYWORD_EXT_TYPE {
            return None;
        }
        rmp_serde::from_slice::<String>(data).ok().map(Keyword::new)
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.0)
    }
}

impl fmt::Debug for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.0)
    }
}

impl Borrow<str> for Keyword {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Keyword {
    fn from(name: &str) -> Self {
        Keyword::new(name)
    }
}

impl Serialize for Keyword {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            return serializer.serialize_str(self.name());
        }
        let data = rmp_serde::to_vec(self.name()).map_err(ser::Error::custom)?;
        serializer.serialize_newtype_struct(
            rmp_serde::MSGPACK_EXT_STRUCT_NAME,
            &(KEYWORD_EXT_TYPE, serde_bytes::ByteBuf::from(data)),
        )
    }
}

struct KeywordVisitor;

impl<'de> Visitor<'de> for KeywordVisitor {
    type Value = Keyword;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a keyword extension value or a name string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Keyword, E> {
        Ok(Keyword::new(v))
    }

    fn visit_newtype_struct<D: Deserializer<'de>>(self, d: D) -> Result<Keyword, D::Error> {
        let (tag, data): (i8, serde_bytes::ByteBuf) = Deserialize::deserialize(d)?;
        Keyword::from_ext(tag, &data)
            .ok_or_else(|| de::Error::custom(format!("extension type {tag} is not a keyword")))
    }
}

impl<'de> Deserialize<'de> for Keyword {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            deserializer.deserialize_str(KeywordVisitor)
        } else {
            deserializer.deserialize_newtype_struct(rmp_serde::MSGPACK_EXT_STRUCT_NAME, KeywordVisitor)
        }
    }
}

/// Interning table for keywords.
///
/// Owned explicitly (by a [`Client`](crate::Client) and handed to its
/// connections) instead of living in a process-wide table. Connections
/// intern every keyword they decode. Clones share the same table. Dropping the
/// last clone releases every interned name that is not still held by a
/// keyword elsewhere.
#[derive(Clone, Default)]
pub struct KeywordRegistry {
    table: Arc<Mutex<HashSet<Keyword>>>,
}

impl KeywordRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the interned keyword for `name`, creating it on first use.
    pub fn intern(&self, name: &str) -> Keyword {
        let mut table = self.table.lock();
        if let Some(existing) = table.get(name) {
            return existing.clone();
        }
        let kw = Keyword::new(name);
        table.insert(kw.clone());
        kw
    }

    /// Return the interned keyword equal to `kw`, adopting `kw` itself if
    /// the name is new.
    pub fn intern_keyword(&self, kw: &Keyword) -> Keyword {
        let mut table = self.table.lock();
        if let Some(existing) = table.get(kw) {
            return existing.clone();
        }
        table.insert(kw.clone());
        kw.clone()
    }

    /// Look up an already-interned keyword.
    pub fn get(&self, name: &str) -> Option<Keyword> {
        self.table.lock().get(name).cloned()
    }

    /// Number of interned names.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// Whether nothing has been interned yet.
    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }

    /// Forget every interned name.
    pub fn clear(&self) {
        self.table.lock().clear();
    }
}

impl fmt::Debug for KeywordRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeywordRegistry")
            .field("len", &self.len())
            .finish()
    }
}
