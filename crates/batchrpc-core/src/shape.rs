//! Expected raw shape of a call's `result` field.

use std::fmt;

use serde_json::Value;

use crate::error::RpcError;

/// The JSON shape a call expects its raw result to have.
///
/// Used as a per-id decoding strategy: each batch item carries its own
/// shape, so a single batch can mix calls returning strings, objects and
/// arrays.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum ResultShape {
    #[default]
    Any,
    String,
    Number,
    Bool,
    Object,
    Array(Box<ResultShape>),
}

impl ResultShape {
    pub fn array_of(inner: ResultShape) -> Self {
        Self::Array(Box::new(inner))
    }

    /// Returns `true` if `value` conforms to this shape.
    ///
    /// `null` conforms to every shape; nodes return it for "not found" and
    /// the call's converter decides what it means.
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) | (Self::Any, _) => true,
            (Self::String, Value::String(_)) => true,
            (Self::Number, Value::Number(_)) => true,
            (Self::Bool, Value::Bool(_)) => true,
            (Self::Object, Value::Object(_)) => true,
            (Self::Array(inner), Value::Array(items)) => items.iter().all(|v| inner.matches(v)),
            _ => false,
        }
    }

    /// Like [`matches`](Self::matches), reporting a mismatch as an
    /// invalid-response error.
    pub fn check(&self, value: &Value) -> Result<(), RpcError> {
        if self.matches(value) {
            Ok(())
        } else {
            Err(RpcError::invalid_response(format!(
                "expected {self} but received {}",
                describe(value)
            )))
        }
    }
}

impl fmt::Display for ResultShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::String => write!(f, "string"),
            Self::Number => write!(f, "number"),
            Self::Bool => write!(f, "bool"),
            Self::Object => write!(f, "object"),
            Self::Array(inner) => write!(f, "array of {inner}"),
        }
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
