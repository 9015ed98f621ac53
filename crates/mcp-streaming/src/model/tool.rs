//! Tool definitions and the fixed parameter schema they expose.
//!
//! The schema language is deliberately small: a flat map of named
//! parameters, each with a type, optional default, and optional enum
//! constraint. It serializes to the `{type: "object", properties, required}`
//! shape clients expect from `tools/list`.

use std::collections::BTreeMap;

use serde_json::{json, Value};

/// The type of a single tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParameterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterKind::String => "string",
            ParameterKind::Number => "number",
            ParameterKind::Boolean => "boolean",
            ParameterKind::Object => "object",
            ParameterKind::Array => "array",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            ParameterKind::String => value.is_string(),
            ParameterKind::Number => value.is_number(),
            ParameterKind::Boolean => value.is_boolean(),
            ParameterKind::Object => value.is_object(),
            ParameterKind::Array => value.is_array(),
        }
    }
}

/// Schema entry for one named parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub kind: ParameterKind,
    pub description: String,
    pub required: bool,
    pub default: Option<Value>,
    pub enum_values: Option<Vec<String>>,
}

impl ParameterSpec {
    pub fn new(kind: ParameterKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            required: false,
            default: None,
            enum_values: None,
        }
    }

    pub fn string(description: impl Into<String>) -> Self {
        Self::new(ParameterKind::String, description)
    }

    pub fn number(description: impl Into<String>) -> Self {
        Self::new(ParameterKind::Number, description)
    }

    pub fn boolean(description: impl Into<String>) -> Self {
        Self::new(ParameterKind::Boolean, description)
    }

    pub fn object(description: impl Into<String>) -> Self {
        Self::new(ParameterKind::Object, description)
    }

    pub fn array(description: impl Into<String>) -> Self {
        Self::new(ParameterKind::Array, description)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn one_of<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }
}

/// A registered tool as advertised to clients.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: BTreeMap<String, ParameterSpec>,
    pub version: String,
    pub enabled: bool,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: BTreeMap::new(),
            version: "1.0".to_string(),
            enabled: true,
        }
    }

    pub fn parameter(mut self, name: impl Into<String>, spec: ParameterSpec) -> Self {
        self.parameters.insert(name.into(), spec);
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Names of parameters the caller must supply.
    ///
    /// Derived from the per-parameter flag, so every required name is a key
    /// of the schema map by construction.
    pub fn required_parameters(&self) -> Vec<&str> {
        self.parameters
            .iter()
            .filter(|(_, spec)| spec.required)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// The `inputSchema` object sent in `tools/list`.
    pub fn input_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        for (name, spec) in &self.parameters {
            let mut property = serde_json::Map::new();
            property.insert("type".into(), json!(spec.kind.as_str()));
            property.insert("description".into(), json!(spec.description));
            if let Some(default) = &spec.default {
                property.insert("default".into(), default.clone());
            }
            if let Some(values) = &spec.enum_values {
                property.insert("enum".into(), json!(values));
            }
            properties.insert(name.clone(), Value::Object(property));
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": self.required_parameters(),
        })
    }

    /// The entry for this tool in a `tools/list` result.
    pub fn listing(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema(),
        })
    }

    /// Check an argument object against the schema.
    ///
    /// Returns warnings for unknown parameters; returns `Err` with one
    /// combined message when required parameters are missing, types
    /// mismatch, or an enum constraint is violated.
    pub fn validate_arguments(&self, arguments: &Value) -> Result<Vec<String>, String> {
        let mut problems = Vec::new();
        let mut warnings = Vec::new();

        let empty = serde_json::Map::new();
        let object = match arguments {
            Value::Null => &empty,
            Value::Object(object) => object,
            _ => return Err("arguments must be a JSON object".to_string()),
        };

        for (name, spec) in &self.parameters {
            match object.get(name) {
                Some(value) => {
                    if !spec.kind.matches(value) {
                        problems.push(format!(
                            "parameter '{name}' must be of type {}",
                            spec.kind.as_str()
                        ));
                    } else if let (Some(values), Some(text)) =
                        (&spec.enum_values, value.as_str())
                    {
                        if !values.iter().any(|v| v == text) {
                            problems.push(format!(
                                "parameter '{name}' must be one of: {}",
                                values.join(", ")
                            ));
                        }
                    }
                }
                None if spec.required => {
                    problems.push(format!("missing required parameter '{name}'"));
                }
                None => {}
            }
        }

        for name in object.keys() {
            if !self.parameters.contains_key(name) {
                warnings.push(format!("unknown parameter '{name}'"));
            }
        }

        if problems.is_empty() {
            Ok(warnings)
        } else {
            Err(problems.join("; "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_tool() -> ToolDefinition {
        ToolDefinition::new("echo", "Echoes back the input message")
            .parameter("message", ParameterSpec::string("text to echo").required())
            .parameter(
                "mode",
                ParameterSpec::string("echo style").one_of(["plain", "loud"]),
            )
    }

    #[test]
    fn input_schema_shape() {
        let schema = echo_tool().input_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["message"]["type"], "string");
        assert_eq!(schema["properties"]["mode"]["enum"][1], "loud");
        assert_eq!(schema["required"], json!(["message"]));
    }

    #[test]
    fn required_names_are_schema_keys() {
        let tool = echo_tool();
        for name in tool.required_parameters() {
            assert!(tool.parameters.contains_key(name));
        }
    }

    #[test]
    fn validate_accepts_good_arguments() {
        let warnings = echo_tool()
            .validate_arguments(&json!({"message": "hi", "mode": "plain"}))
            .unwrap();
        assert!(warnings.is_empty());
    }

    #[test]
    fn validate_reports_missing_required() {
        let err = echo_tool().validate_arguments(&json!({})).unwrap_err();
        assert!(err.contains("missing required parameter 'message'"));
    }

    #[test]
    fn validate_reports_type_mismatch() {
        let err = echo_tool()
            .validate_arguments(&json!({"message": 5}))
            .unwrap_err();
        assert!(err.contains("must be of type string"));
    }

    #[test]
    fn validate_reports_enum_violation() {
        let err = echo_tool()
            .validate_arguments(&json!({"message": "hi", "mode": "whisper"}))
            .unwrap_err();
        assert!(err.contains("must be one of: plain, loud"));
    }

    #[test]
    fn validate_combines_problems() {
        let err = echo_tool()
            .validate_arguments(&json!({"mode": 1}))
            .unwrap_err();
        assert!(err.contains("missing required parameter 'message'"));
        assert!(err.contains("parameter 'mode' must be of type string"));
    }

    #[test]
    fn validate_warns_on_unknown_parameters() {
        let warnings = echo_tool()
            .validate_arguments(&json!({"message": "hi", "volume": 11}))
            .unwrap();
        assert_eq!(warnings, vec!["unknown parameter 'volume'".to_string()]);
    }

    #[test]
    fn null_arguments_ok_when_nothing_required() {
        let tool = ToolDefinition::new("ping", "no arguments");
        assert!(tool.validate_arguments(&Value::Null).is_ok());
    }
}
