//! Message types for fieldpatch
//!
//! This module defines the core types that flow through the pipeline:
//! - [`Value`], the dynamically typed reading carried by a device update
//! - [`Truthy`], the single coercion used by every trigger check
//! - [`Message`], one `{address, value}` update
//! - [`Document`], the ordered key/value map sent to the sink

use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Ordered document of top-level fields
pub type Document = BTreeMap<String, Value>;

/// Largest integer an f64 carries exactly
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

/// A device reading
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Missing or null reading
    #[default]
    Null,
    /// Boolean reading
    Bool(bool),
    /// Numeric reading (all JSON numbers)
    Number(f64),
    /// Text reading
    Text(String),
}

/// Result of coercing a [`Value`] to a trigger level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truthy {
    /// Numeric `1` or text `"1"`
    High,
    /// Numeric `0` or text `"0"`
    Low,
    /// Any other representation
    Unsupported,
}

impl Value {
    /// Coerce to a trigger level.
    ///
    /// Numeric and text spellings of `1`/`0` are equivalent. Booleans and
    /// every other number or string are [`Truthy::Unsupported`].
    pub fn truthy(&self) -> Truthy {
        match self {
            Value::Number(n) if *n == 1.0 => Truthy::High,
            Value::Number(n) if *n == 0.0 => Truthy::Low,
            Value::Text(s) if s == "1" => Truthy::High,
            Value::Text(s) if s == "0" => Truthy::Low,
            _ => Truthy::Unsupported,
        }
    }

    /// Numeric value, if this is a number
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Text value, if this is text
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// True for `Value::Null`
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// True for a numeric zero
    pub fn is_zero(&self) -> bool {
        matches!(self, Value::Number(n) if *n == 0.0)
    }

    /// Text rendering used for identifier parts and register writes.
    /// Null renders as `None`.
    pub fn render(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(b.to_string()),
            Value::Number(n) => Some(format_number(*n)),
            Value::Text(s) => Some(s.clone()),
        }
    }

    /// Convert from an arbitrary JSON value. Arrays and objects have no
    /// reading representation and become `None`.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => Some(Value::Null),
            serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
            serde_json::Value::Number(n) => n.as_f64().map(Value::Number),
            serde_json::Value::String(s) => Some(Value::Text(s.clone())),
            _ => None,
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < MAX_EXACT_INT {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            // Integral readings go out as JSON integers.
            Value::Number(n) if n.fract() == 0.0 && n.abs() < MAX_EXACT_INT => {
                serializer.serialize_i64(*n as i64)
            }
            Value::Number(n) => serializer.serialize_f64(*n),
            Value::Text(s) => serializer.serialize_str(s),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.render() {
            Some(s) => write!(f, "{}", s),
            None => write!(f, "null"),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

/// One raw device update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Device address as published (case preserved)
    pub address: String,
    /// Reading; absent values decode as null
    #[serde(default)]
    pub value: Value,
}

impl Message {
    /// Create a message
    pub fn new(address: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            address: address.into(),
            value: value.into(),
        }
    }

    /// Address normalized for store lookups
    pub fn key(&self) -> String {
        self.address.to_lowercase()
    }
}

/// Parse one batch: a JSON array of `{address, value}` objects
pub fn parse_batch(raw: &str) -> Result<Vec<Message>, serde_json::Error> {
    serde_json::from_str(raw)
}

/// Serialize a batch in the ingress wire format
pub fn encode_batch(messages: &[Message]) -> Result<String, serde_json::Error> {
    serde_json::to_string(messages)
}
