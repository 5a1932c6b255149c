//! Row representation shared by the query, store and rendering layers

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One row of an entity, keyed by column or attribute name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    values: Map<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from a JSON object; any other JSON value yields `None`
    pub fn from_json(value: Value) -> Option<Self> {
        match value {
            Value::Object(values) => Some(Self { values }),
            _ => None,
        }
    }

    /// Set a value, builder style
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(field.into(), value.into());
    }

    /// Raw value of `field`, `None` when absent or NULL
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field).filter(|v| !v.is_null())
    }

    pub fn contains(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    /// Text form of the key stored in `field`, as used to match related rows
    pub fn key(&self, field: &str) -> Option<String> {
        self.get(field).and_then(key_text)
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn into_json(self) -> Value {
        Value::Object(self.values)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(values: Map<String, Value>) -> Self {
        Self { values }
    }
}

/// Text form of a scalar key value
///
/// Strings are used verbatim and numbers in their JSON spelling, so an integer
/// key `4` and the string `"4"` produced by a `::text` cast compare equal.
pub fn key_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
