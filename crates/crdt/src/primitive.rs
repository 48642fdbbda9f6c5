//! Primitive values: the immutable leaves of a document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An immutable primitive value.
///
/// Integer and Long are distinct on the wire (i32 vs i64), matching the
/// counter variants. Dates carry millisecond precision UTC timestamps.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PrimitiveValue {
    Null,
    Bool(bool),
    Integer(i32),
    Long(i64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    Date(DateTime<Utc>),
}

impl PrimitiveValue {
    /// Descriptive name of the variant.
    pub fn type_name(&self) -> &'static str {
        match self {
            PrimitiveValue::Null => "null",
            PrimitiveValue::Bool(_) => "boolean",
            PrimitiveValue::Integer(_) => "integer",
            PrimitiveValue::Long(_) => "long",
            PrimitiveValue::Double(_) => "double",
            PrimitiveValue::String(_) => "string",
            PrimitiveValue::Bytes(_) => "bytes",
            PrimitiveValue::Date(_) => "date",
        }
    }

    /// Render as canonical JSON. Bytes render as an array of numbers,
    /// dates as their epoch milliseconds.
    pub fn to_json(&self) -> String {
        match self {
            PrimitiveValue::Null => "null".to_string(),
            PrimitiveValue::Bool(b) => b.to_string(),
            PrimitiveValue::Integer(i) => i.to_string(),
            PrimitiveValue::Long(l) => l.to_string(),
            PrimitiveValue::Double(d) => {
                serde_json::Number::from_f64(*d).map_or_else(|| "null".to_string(), |n| n.to_string())
            }
            PrimitiveValue::String(s) => serde_json::Value::from(s.as_str()).to_string(),
            PrimitiveValue::Bytes(b) => serde_json::Value::from(b.clone()).to_string(),
            PrimitiveValue::Date(d) => d.timestamp_millis().to_string(),
        }
    }
}

impl fmt::Display for PrimitiveValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl From<bool> for PrimitiveValue {
    fn from(v: bool) -> Self {
        PrimitiveValue::Bool(v)
    }
}

impl From<i32> for PrimitiveValue {
    fn from(v: i32) -> Self {
        PrimitiveValue::Integer(v)
    }
}

impl From<i64> for PrimitiveValue {
    fn from(v: i64) -> Self {
        PrimitiveValue::Long(v)
    }
}

impl From<f64> for PrimitiveValue {
    fn from(v: f64) -> Self {
        PrimitiveValue::Double(v)
    }
}

impl From<&str> for PrimitiveValue {
    fn from(v: &str) -> Self {
        PrimitiveValue::String(v.to_string())
    }
}

impl From<String> for PrimitiveValue {
    fn from(v: String) -> Self {
        PrimitiveValue::String(v)
    }
}
