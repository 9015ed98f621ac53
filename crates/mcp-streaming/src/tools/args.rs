//! Flat argument map handed to tool executors.
//!
//! Validated argument objects are flattened to a string map: scalars keep
//! their textual form, objects and arrays stay JSON-encoded. Typed
//! accessors parse back out of the strings.

use std::collections::HashMap;

use serde_json::Value;

#[derive(Debug, Clone, Default)]
pub struct ToolArguments {
    values: HashMap<String, String>,
    raw: Value,
}

impl ToolArguments {
    /// Flatten a JSON argument object. `null` yields an empty map.
    pub fn from_value(value: &Value) -> Self {
        let mut values = HashMap::new();
        if let Value::Object(object) = value {
            for (key, entry) in object {
                let text = match entry {
                    Value::String(s) => s.clone(),
                    Value::Bool(b) => b.to_string(),
                    Value::Number(n) => n.to_string(),
                    Value::Null => String::new(),
                    other => serde_json::to_string(other).unwrap_or_default(),
                };
                values.insert(key.clone(), text);
            }
        }
        Self {
            values,
            raw: value.clone(),
        }
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.values.get(key)?.parse().ok()
    }

    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.values.get(key)?.parse().ok()
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key)?.parse().ok()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The original JSON value, for tools that need structure back.
    pub fn raw(&self) -> &Value {
        &self.raw
    }
}
