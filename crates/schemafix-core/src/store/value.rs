//! Row values read from the store.

use rusqlite::types::ValueRef;
use serde::Serialize;

/// A single stored value, preserving its storage class.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    /// Text whose bytes are not valid UTF-8.
    TextBytes(Vec<u8>),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Render as a SQL literal that reproduces the same value and storage
    /// class when executed.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Real(f) => real_literal(*f),
            Value::Text(s) if s.contains('\0') => text_from_bytes(s.as_bytes()),
            Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Value::TextBytes(bytes) => text_from_bytes(bytes),
            Value::Blob(bytes) => format!("X'{}'", hex::encode_upper(bytes)),
        }
    }
}

fn real_literal(f: f64) -> String {
    if f.is_nan() {
        // SQLite stores NaN as NULL.
        "NULL".to_string()
    } else if f == f64::INFINITY {
        "9e999".to_string()
    } else if f == f64::NEG_INFINITY {
        "-9e999".to_string()
    } else {
        let s = format!("{:?}", f);
        if s.contains(['.', 'e', 'E']) {
            s
        } else {
            format!("{}.0", s)
        }
    }
}

fn text_from_bytes(bytes: &[u8]) -> String {
    format!("CAST(X'{}' AS TEXT)", hex::encode_upper(bytes))
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Real(f),
            ValueRef::Text(bytes) => match std::str::from_utf8(bytes) {
                Ok(s) => Value::Text(s.to_string()),
                Err(_) => Value::TextBytes(bytes.to_vec()),
            },
            ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
        }
    }
}
