mod float;


use derive_more::{Deref, Display, From};
use serde::{Deserialize, Serialize};
use std::fmt;

// re-exports
pub use float::Float64;

///
/// Value
///
/// Dynamic property value moved between native objects, shadow storage,
/// sidecars, and keys. `Null` is a real stored value, distinct from the
/// absence of a value (`Option::None`) wherever absence matters.
///

#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(Float64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Declared kind matching this value, `None` for `Null`.
    #[must_use]
    pub const fn kind(&self) -> Option<ValueKind> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(ValueKind::Bool),
            Self::Int(_) => Some(ValueKind::Int),
            Self::Uint(_) => Some(ValueKind::Uint),
            Self::Float(_) => Some(ValueKind::Float),
            Self::Text(_) => Some(ValueKind::Text),
            Self::Blob(_) => Some(ValueKind::Blob),
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_uint(&self) -> Option<u64> {
        match self {
            Self::Uint(v) => Some(*v),
            _ => None,
        }
    }

    /// Canonical byte encoding used for key fingerprints.
    pub(crate) fn write_canonical(&self, out: &mut Vec<u8>) {
        match self {
            Self::Null => out.push(0),
            Self::Bool(v) => {
                out.push(1);
                out.push(u8::from(*v));
            }
            Self::Int(v) => {
                out.push(2);
                out.extend_from_slice(&v.to_be_bytes());
            }
            Self::Uint(v) => {
                out.push(3);
                out.extend_from_slice(&v.to_be_bytes());
            }
            Self::Float(v) => {
                out.push(4);
                out.extend_from_slice(&v.to_be_bytes());
            }
            Self::Text(v) => {
                out.push(5);
                out.extend_from_slice(&(v.len() as u64).to_be_bytes());
                out.extend_from_slice(v.as_bytes());
            }
            Self::Blob(v) => {
                out.push(6);
                out.extend_from_slice(&(v.len() as u64).to_be_bytes());
                out.extend_from_slice(v);
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Uint(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "'{v}'"),
            Self::Blob(v) => write!(f, "blob[{}]", v.len()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::Uint(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Blob(v)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

///
/// ValueKind
///
/// Declared type of a property. Keys of the same kind share one simple key
/// factory, and the kind supplies the default value used to decide whether
/// a generated property still "lacks a value".
///

#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum ValueKind {
    Bool,
    Int,
    Uint,
    Float,
    Text,
    Blob,
}

impl ValueKind {
    // ── Kind tags (do not reorder) ─────────────────
    const TAG_BOOL: u8 = 1;
    const TAG_INT: u8 = 2;
    const TAG_UINT: u8 = 3;
    const TAG_FLOAT: u8 = 4;
    const TAG_TEXT: u8 = 5;
    const TAG_BLOB: u8 = 6;

    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Bool => Self::TAG_BOOL,
            Self::Int => Self::TAG_INT,
            Self::Uint => Self::TAG_UINT,
            Self::Float => Self::TAG_FLOAT,
            Self::Text => Self::TAG_TEXT,
            Self::Blob => Self::TAG_BLOB,
        }
    }

    /// Value a freshly constructed native field of this kind holds.
    #[must_use]
    pub const fn default_value(self) -> Value {
        match self {
            Self::Bool => Value::Bool(false),
            Self::Int => Value::Int(0),
            Self::Uint => Value::Uint(0),
            Self::Float => Value::Float(Float64::ZERO),
            Self::Text => Value::Text(String::new()),
            Self::Blob => Value::Blob(Vec::new()),
        }
    }

    /// Whether `value` counts as "no value yet" for this kind.
    #[must_use]
    pub fn is_default(self, value: &Value) -> bool {
        value.is_null() || *value == self.default_value()
    }

    /// Whether `value` may be stored in a property of this kind.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        value.kind().is_none_or(|kind| kind == self)
    }
}

///
/// ValueBuffer
///
/// Ordered, random-accessible raw row handed over by a query pipeline.
/// Slot `i` holds the value of the property with dense index `i`.
///

#[derive(Clone, Debug, Default, Deref, Eq, From, PartialEq)]
pub struct ValueBuffer(Vec<Value>);

impl ValueBuffer {
    #[must_use]
    pub const fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// Slot value, `Null` when the row is shorter than the shape.
    #[must_use]
    pub fn value(&self, index: usize) -> Value {
        self.0.get(index).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<Value> {
        self.0
    }
}

impl FromIterator<Value> for ValueBuffer {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
