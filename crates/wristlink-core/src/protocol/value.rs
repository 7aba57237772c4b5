//! Primitive values carried by the vendor transport.
//!
//! The transport between phone and watch moves ordered lists of loosely typed
//! primitives.  [`Value`] is the closed set of primitives we are prepared to
//! send or accept; anything else the vendor SDK might hand us is rejected by
//! the transport adapter before it ever reaches the codec.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single primitive field in a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Opaque binary blob (route geometry, tile bitmaps, packed settings).
    Bytes(Vec<u8>),
}

/// The primitive kind of a [`Value`], used in decode error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    Text,
    Bytes,
}

impl Value {
    /// Returns the primitive kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Text(_) => ValueKind::Text,
            Value::Bytes(_) => ValueKind::Bytes,
        }
    }

    /// Returns the integer payload, if this is an [`Value::Int`].
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Text => "text",
            ValueKind::Bytes => "bytes",
        };
        f.write_str(name)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        assert_eq!(Value::Bool(true).kind(), ValueKind::Bool);
        assert_eq!(Value::Int(7).kind(), ValueKind::Int);
        assert_eq!(Value::Float(1.5).kind(), ValueKind::Float);
        assert_eq!(Value::Text("a".into()).kind(), ValueKind::Text);
        assert_eq!(Value::Bytes(vec![1]).kind(), ValueKind::Bytes);
    }

    #[test]
    fn test_as_int_only_for_int_values() {
        assert_eq!(Value::Int(-3).as_int(), Some(-3));
        assert_eq!(Value::Text("3".into()).as_int(), None);
    }

    #[test]
    fn test_from_widens_unsigned_integers() {
        assert_eq!(Value::from(u32::MAX), Value::Int(4_294_967_295));
        assert_eq!(Value::from(7u8), Value::Int(7));
    }

    #[test]
    fn test_value_kind_display_is_lowercase() {
        assert_eq!(ValueKind::Bytes.to_string(), "bytes");
        assert_eq!(ValueKind::Int.to_string(), "int");
    }
}
