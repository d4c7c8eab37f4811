//! Typed attribute values, the wire shape of key-value items.

use std::collections::BTreeMap;

use serde_json::{Map, Number, Value};
use thiserror::Error;

/// One item of the table: attribute name to value.
pub type Item = BTreeMap<String, AttributeValue>;

/// A single attribute, tagged with its storage type.
///
/// Numbers travel as decimal strings so no precision is lost between the
/// service and the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    /// String.
    S(String),
    /// Number, as its decimal representation.
    N(String),
    /// Boolean.
    Bool(bool),
    /// Explicit null.
    Null,
    /// Ordered list.
    L(Vec<AttributeValue>),
    /// Nested map.
    M(BTreeMap<String, AttributeValue>),
}

impl AttributeValue {
    /// The string content, if this is an `S` value.
    #[must_use]
    pub fn as_s(&self) -> Option<&str> {
        match self {
            Self::S(s) => Some(s),
            _ => None,
        }
    }

    /// The decimal content, if this is an `N` value.
    #[must_use]
    pub fn as_n(&self) -> Option<&str> {
        match self {
            Self::N(n) => Some(n),
            _ => None,
        }
    }
}

/// An attribute value that does not map back to JSON.
#[derive(Debug, Error)]
pub enum AttributeError {
    /// An `N` value whose text is not a JSON number.
    #[error("malformed number attribute: {0:?}")]
    InvalidNumber(String),
}

/// Converts a JSON document into an attribute value.
#[must_use]
pub fn marshal(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null,
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Array(items) => AttributeValue::L(items.iter().map(marshal).collect()),
        Value::Object(map) => AttributeValue::M(
            map.iter()
                .map(|(key, value)| (key.clone(), marshal(value)))
                .collect(),
        ),
    }
}

/// Converts an attribute value back into JSON.
///
/// # Errors
///
/// Returns `AttributeError::InvalidNumber` if an `N` value is not a JSON number.
pub fn unmarshal(value: AttributeValue) -> Result<Value, AttributeError> {
    Ok(match value {
        AttributeValue::Null => Value::Null,
        AttributeValue::Bool(b) => Value::Bool(b),
        AttributeValue::N(n) => Value::Number(parse_number(n)?),
        AttributeValue::S(s) => Value::String(s),
        AttributeValue::L(items) => Value::Array(
            items
                .into_iter()
                .map(unmarshal)
                .collect::<Result<_, _>>()?,
        ),
        AttributeValue::M(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| Ok((key, unmarshal(value)?)))
                .collect::<Result<Map<_, _>, AttributeError>>()?,
        ),
    })
}

fn parse_number(n: String) -> Result<Number, AttributeError> {
    n.parse::<Number>().map_err(|_| AttributeError::InvalidNumber(n))
}
