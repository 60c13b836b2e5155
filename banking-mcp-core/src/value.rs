//! Schema-less payload helpers
//!
//! Task payloads, agent metadata and routing hints are free-form JSON maps.
//! Code that needs a specific field reads it through [`read_field`] so that a
//! missing key and a key holding the wrong kind of value stay distinguishable.

use serde_json::Value;

/// Free-form key/value map carried by tasks, sessions and agents
pub type ValueMap = serde_json::Map<String, Value>;

/// Result of reading a typed field out of a [`ValueMap`]
#[derive(Debug, Clone, PartialEq)]
pub enum FieldRead<T> {
    Present(T),
    Absent,
    /// The key exists but holds a value of another JSON kind
    Mistyped { found: &'static str },
}

impl<T> FieldRead<T> {
    pub fn present(self) -> Option<T> {
        match self {
            FieldRead::Present(value) => Some(value),
            _ => None,
        }
    }
}

/// Conversion from a JSON value into a concrete field type
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64()
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_string)
    }
}

impl FromValue for ValueMap {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_object().cloned()
    }
}

/// Read `key` from `map` as `T`
pub fn read_field<T: FromValue>(map: &ValueMap, key: &str) -> FieldRead<T> {
    match map.get(key) {
        None | Some(Value::Null) => FieldRead::Absent,
        Some(value) => match T::from_value(value) {
            Some(typed) => FieldRead::Present(typed),
            None => FieldRead::Mistyped {
                found: kind_of(value),
            },
        },
    }
}

/// JSON kind name, used in log fields
pub fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
