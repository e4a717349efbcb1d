//! Cached Values
//!
//! The payload a layer stores for a key. Serialization is left to callers:
//! a value is either raw bytes or an explicitly cached nil.

use bytes::Bytes;

/// A cached value
///
/// `Nil` is a stored "nothing" and is a hit, unlike a miss which is
/// represented by `Option::None` at the layer boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    /// Explicitly cached absent value
    Nil,
    /// Raw payload
    Data(Bytes),
}

impl Value {
    /// Encode a counter as ASCII decimal
    pub fn from_counter(n: i64) -> Self {
        Value::Data(Bytes::from(n.to_string()))
    }

    /// Decode an ASCII decimal counter
    ///
    /// Returns `None` for `Nil` and for payloads that are not an integer.
    pub fn as_counter(&self) -> Option<i64> {
        match self {
            Value::Nil => None,
            Value::Data(data) => std::str::from_utf8(data).ok()?.trim().parse().ok(),
        }
    }

    /// Check for the explicit nil marker
    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Borrow the payload, if any
    #[inline]
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Nil => None,
            Value::Data(data) => Some(data),
        }
    }

    /// Payload as UTF-8 text, if it is valid
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Payload size in bytes (0 for nil)
    #[inline]
    pub fn size(&self) -> u64 {
        self.as_bytes().map_or(0, |b| b.len() as u64)
    }
}

impl From<Bytes> for Value {
    fn from(data: Bytes) -> Self {
        Value::Data(data)
    }
}

impl From<Vec<u8>> for Value {
    fn from(data: Vec<u8>) -> Self {
        Value::Data(Bytes::from(data))
    }
}

impl From<&'static [u8]> for Value {
    fn from(data: &'static [u8]) -> Self {
        Value::Data(Bytes::from_static(data))
    }
}

impl From<&'static str> for Value {
    fn from(s: &'static str) -> Self {
        Value::Data(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Data(Bytes::from(s))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Nil, Into::into)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Nil => write!(f, "(nil)"),
            Value::Data(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "{}", s),
                Err(_) => write!(f, "<{} bytes>", data.len()),
            },
        }
    }
}
