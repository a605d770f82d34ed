//! Core type definitions for PDCIO
//!
//! Identifiers for objects and shards, and the typed attribute values that
//! the attribute index stores and orders.

use crate::error::{Error, Result};
use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of one logical index-serving partition, in `[0, num_shards)`
pub type ShardId = u32;

/// Identifier of a stored object
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, From, Into, Display,
)]
#[display("{_0}")]
pub struct ObjectId(u64);

impl ObjectId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.0)
    }
}

/// Type tag of an attribute value
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    #[display("int64")]
    Int64,
    #[display("uint64")]
    UInt64,
    #[display("double")]
    Double,
    #[display("string")]
    String,
}

impl ValueType {
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        !matches!(self, Self::String)
    }
}

/// A typed attribute value
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Int64(i64),
    UInt64(u64),
    Double(f64),
    String(String),
}

impl AttrValue {
    #[must_use]
    pub const fn value_type(&self) -> ValueType {
        match self {
            Self::Int64(_) => ValueType::Int64,
            Self::UInt64(_) => ValueType::UInt64,
            Self::Double(_) => ValueType::Double,
            Self::String(_) => ValueType::String,
        }
    }

    #[must_use]
    pub const fn is_numeric(&self) -> bool {
        self.value_type().is_numeric()
    }

    /// Raw attribute bytes (numeric values are little-endian, 8 bytes)
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Int64(v) => v.to_le_bytes().to_vec(),
            Self::UInt64(v) => v.to_le_bytes().to_vec(),
            Self::Double(v) => v.to_le_bytes().to_vec(),
            Self::String(s) => s.as_bytes().to_vec(),
        }
    }

    /// Decode raw attribute bytes for the given type
    pub fn from_bytes(bytes: &[u8], value_type: ValueType) -> Result<Self> {
        if value_type == ValueType::String {
            return Ok(Self::String(String::from_utf8(bytes.to_vec())?));
        }
        let raw: [u8; 8] = bytes.try_into().map_err(|_| Error::InvalidValueWidth {
            value_type,
            expected: 8,
            actual: bytes.len(),
        })?;
        Ok(match value_type {
            ValueType::Int64 => Self::Int64(i64::from_le_bytes(raw)),
            ValueType::UInt64 => Self::UInt64(u64::from_le_bytes(raw)),
            _ => Self::Double(f64::from_le_bytes(raw)),
        })
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric value widened to `f64`, used for range placement
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int64(v) => Some(*v as f64),
            Self::UInt64(v) => Some(*v as f64),
            Self::Double(v) => Some(*v),
            Self::String(_) => None,
        }
    }

    /// Order-preserving ordinal within the value's own type
    ///
    /// Two values of the same numeric type compare the same way as their
    /// ordinals. Strings have no ordinal.
    #[must_use]
    pub fn sort_key(&self) -> Option<u64> {
        match self {
            Self::Int64(v) => Some(i64_ordinal(*v)),
            Self::UInt64(v) => Some(*v),
            Self::Double(v) => Some(f64_ordinal(*v)),
            Self::String(_) => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int64(v) => write!(f, "{v}"),
            Self::UInt64(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::String(s) => write!(f, "\"{s}\""),
        }
    }
}

/// Map an `i64` onto `u64` preserving order
#[must_use]
#[allow(clippy::cast_sign_loss)]
pub const fn i64_ordinal(v: i64) -> u64 {
    (v as u64) ^ (1 << 63)
}

/// Map an `f64` onto `u64` preserving total order (negative zero folds to zero)
#[must_use]
pub fn f64_ordinal(v: f64) -> u64 {
    let v = if v == 0.0 { 0.0 } else { v };
    let bits = v.to_bits();
    if bits >> 63 == 1 {
        !bits
    } else {
        bits | (1 << 63)
    }
}

/// One object-attribute association
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexKey {
    pub attribute_name: String,
    pub value: AttrValue,
    pub object_id: ObjectId,
}

impl IndexKey {
    pub fn new(
        attribute_name: impl Into<String>,
        value: AttrValue,
        object_id: impl Into<ObjectId>,
    ) -> Result<Self> {
        let attribute_name = attribute_name.into();
        if attribute_name.is_empty() {
            return Err(Error::invalid_key("attribute name is empty"));
        }
        if attribute_name.contains(KEY_SEPARATOR) {
            return Err(Error::invalid_key(format!(
                "attribute name {attribute_name:?} contains the key separator"
            )));
        }
        Ok(Self {
            attribute_name,
            value,
            object_id: object_id.into(),
        })
    }

    /// Shorthand for a string-valued key
    pub fn string(
        attribute_name: impl Into<String>,
        value: impl Into<String>,
        object_id: u64,
    ) -> Result<Self> {
        Self::new(
            attribute_name,
            AttrValue::String(value.into()),
            ObjectId::new(object_id),
        )
    }

    /// Build a key from the raw `(bytes, type)` attribute form
    pub fn from_raw(
        attribute_name: impl Into<String>,
        bytes: &[u8],
        value_type: ValueType,
        object_id: u64,
    ) -> Result<Self> {
        let value = AttrValue::from_bytes(bytes, value_type)?;
        Self::new(attribute_name, value, ObjectId::new(object_id))
    }

    #[must_use]
    pub const fn value_type(&self) -> ValueType {
        self.value.value_type()
    }
}

/// Separator joining attribute names and values in composite routing keys
pub const KEY_SEPARATOR: char = '\x1f';

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_i64_ordinal_preserves_order() {
        let values = [i64::MIN, -1000, -1, 0, 1, 42, i64::MAX];
        for pair in values.windows(2) {
            assert!(i64_ordinal(pair[0]) < i64_ordinal(pair[1]));
        }
    }

    #[test]
    fn test_f64_ordinal_preserves_order() {
        let mut rng = rand::thread_rng();
        for _ in 0..1000 {
            let a: f64 = rng.gen_range(-1e12..1e12);
            let b: f64 = rng.gen_range(-1e12..1e12);
            assert_eq!(a < b, f64_ordinal(a) < f64_ordinal(b), "{a} vs {b}");
        }
        assert_eq!(f64_ordinal(-0.0), f64_ordinal(0.0));
        assert!(f64_ordinal(f64::NEG_INFINITY) < f64_ordinal(f64::MIN));
        assert!(f64_ordinal(f64::MAX) < f64_ordinal(f64::INFINITY));
    }

    #[test]
    fn test_from_raw() {
        let key = IndexKey::from_raw("temp", &42i64.to_le_bytes(), ValueType::Int64, 7).unwrap();
        assert_eq!(key.value, AttrValue::Int64(42));
        assert_eq!(key.object_id, ObjectId::new(7));

        let key = IndexKey::from_raw("name", b"str001str", ValueType::String, 1).unwrap();
        assert_eq!(key.value.as_str(), Some("str001str"));

        let err = IndexKey::from_raw("temp", &[1, 2, 3], ValueType::Double, 1).unwrap_err();
        assert!(matches!(err, Error::InvalidValueWidth { actual: 3, .. }));
    }

    #[test]
    fn test_invalid_attribute_names() {
        assert!(IndexKey::string("", "v", 1).is_err());
        assert!(IndexKey::string("a\x1fb", "v", 1).is_err());
    }

    #[test]
    fn test_bytes_round_trip() {
        for value in [
            AttrValue::Int64(-5),
            AttrValue::UInt64(5),
            AttrValue::Double(2.5),
            AttrValue::String("abc".into()),
        ] {
            let bytes = value.to_bytes();
            assert_eq!(AttrValue::from_bytes(&bytes, value.value_type()).unwrap(), value);
        }
    }
}
