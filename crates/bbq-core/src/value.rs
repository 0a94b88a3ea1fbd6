//! Dynamically typed attribute and signal values.
//!
//! Discovery snapshots and notification bodies carry values whose type is
//! only known at runtime. [`Value`] is the closed set of shapes the bus can
//! produce, so graph building and decoding can match on them exhaustively
//! instead of downcasting.

use std::collections::HashMap;
use std::fmt;

/// A string-keyed map of values (a D-Bus `a{sv}`).
pub type ValueMap = HashMap<String, Value>;

/// A dynamically typed value received from the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// UTF-8 string.
    String(String),
    /// Boolean.
    Bool(bool),
    /// Signed integer of any width.
    Int(i64),
    /// Unsigned integer of any width (other than byte arrays).
    Uint(u64),
    /// Floating point number.
    Float(f64),
    /// Byte sequence (`ay`).
    Bytes(Vec<u8>),
    /// Object path referencing another bus object.
    ObjectPath(String),
    /// Homogeneous or heterogeneous sequence.
    Array(Vec<Value>),
    /// Nested string-keyed map.
    Map(ValueMap),
}

impl Value {
    /// Construct an object path value.
    pub fn object_path(path: impl Into<String>) -> Self {
        Self::ObjectPath(path.into())
    }

    /// Short name of the variant, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Uint(_) => "uint",
            Self::Float(_) => "float",
            Self::Bytes(_) => "bytes",
            Self::ObjectPath(_) => "object path",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
        }
    }

    /// The string payload, if this is a [`Value::String`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// The path, if this is a [`Value::ObjectPath`].
    pub fn as_object_path(&self) -> Option<&str> {
        match self {
            Self::ObjectPath(p) => Some(p),
            _ => None,
        }
    }

    /// The boolean, if this is a [`Value::Bool`].
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The bytes, if this is a [`Value::Bytes`].
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// The elements, if this is a [`Value::Array`].
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    /// The entries, if this is a [`Value::Map`].
    pub fn as_map(&self) -> Option<&ValueMap> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// String elements of an array, skipping anything that is not a string.
    ///
    /// Used for attributes such as `Flags` and `UUIDs`.
    pub fn string_list(&self) -> Vec<String> {
        self.as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{:?}", s),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Uint(u) => write!(f, "{}", u),
            Self::Float(x) => write!(f, "{}", x),
            Self::Bytes(b) => {
                write!(f, "[")?;
                for (i, byte) in b.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{:02x}", byte)?;
                }
                write!(f, "]")
            }
            Self::ObjectPath(p) => write!(f, "{}", p),
            Self::Array(items) => write!(f, "<array of {}>", items.len()),
            Self::Map(m) => write!(f, "<map of {}>", m.len()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Self::Bytes(b.to_vec())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<u64> for Value {
    fn from(u: u64) -> Self {
        Self::Uint(u)
    }
}

impl From<ValueMap> for Value {
    fn from(m: ValueMap) -> Self {
        Self::Map(m)
    }
}
