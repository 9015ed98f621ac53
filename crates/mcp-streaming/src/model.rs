//! JSON-RPC 2.0 codec and MCP protocol data types.
//!
//! Wire messages come in three shapes: [`JsonRpcRequest`] (has an `id`),
//! [`JsonRpcNotification`] (no `id`), and [`JsonRpcResponse`] (carries
//! `result` or `error`). [`JsonRpcMessage::parse`] classifies raw bytes by
//! the presence of `result`/`error` first, then `id`, matching the JSON-RPC
//! 2.0 specification.
//!
//! Request IDs are stored as strings; numeric IDs are accepted on input and
//! stringified, so a client sending `"id": 1` receives `"id": "1"` back.

mod capabilities;
mod content;
mod tool;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use self::capabilities::{
    Capabilities, PromptsCapability, ResourcesCapability, RootsCapability, ToolsCapability,
};
pub use self::content::{CallToolResult, Content};
pub use self::tool::{ParameterKind, ParameterSpec, ToolDefinition};
use crate::error::ErrorData;

/// Object type used for free-form JSON maps.
pub type JsonObject = serde_json::Map<String, Value>;

/// The protocol revision this server speaks.
pub const PROTOCOL_VERSION: &str = "2025-06-18";

/// The literal `"2.0"` version tag present on every message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonRpcVersion2_0;

impl Serialize for JsonRpcVersion2_0 {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("2.0")
    }
}

impl<'de> Deserialize<'de> for JsonRpcVersion2_0 {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let version: std::borrow::Cow<'de, str> = Deserialize::deserialize(deserializer)?;
        if version == "2.0" {
            Ok(JsonRpcVersion2_0)
        } else {
            Err(serde::de::Error::custom(format!(
                "unsupported JSON-RPC version: {version}"
            )))
        }
    }
}

/// A request identifier, stored in canonical string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        RequestId(value.to_string())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        RequestId(value)
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        RequestId(value.to_string())
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::String(s) => Ok(RequestId(s)),
            Value::Number(n) => Ok(RequestId(n.to_string())),
            other => Err(serde::de::Error::custom(format!(
                "request id must be a string or number, got {other}"
            ))),
        }
    }
}

/// A JSON-RPC request: carries an `id` and expects a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: JsonRpcVersion2_0,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion2_0,
            id: id.into(),
            method: method.into(),
            params: None,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }
}

/// A JSON-RPC notification: no `id`, no response expected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: JsonRpcVersion2_0,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JsonRpcVersion2_0,
            method: method.into(),
            params: None,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }
}

/// A JSON-RPC response: exactly one of `result` or `error` is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: JsonRpcVersion2_0,
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorData>,
}

impl JsonRpcResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JsonRpcVersion2_0,
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: RequestId, error: ErrorData) -> Self {
        Self {
            jsonrpc: JsonRpcVersion2_0,
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Any JSON-RPC 2.0 message this server sends or receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

impl JsonRpcMessage {
    /// Parse a single message from raw bytes.
    ///
    /// Classification order follows the specification: a `result` or
    /// `error` member makes it a response, otherwise an `id` makes it a
    /// request, otherwise it is a notification.
    pub fn parse(raw: &[u8]) -> Result<Self, ErrorData> {
        let value: Value = serde_json::from_slice(raw)
            .map_err(|e| ErrorData::parse_error(format!("Parse error: {e}")))?;
        Self::from_value(value)
    }

    /// Classify and convert an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, ErrorData> {
        let object = match &value {
            Value::Object(object) => object,
            _ => return Err(ErrorData::invalid_request("message must be a JSON object")),
        };
        match object.get("jsonrpc") {
            Some(Value::String(v)) if v == "2.0" => {}
            _ => {
                return Err(ErrorData::invalid_request(
                    "missing or invalid jsonrpc version",
                ))
            }
        }

        if object.contains_key("result") || object.contains_key("error") {
            return serde_json::from_value::<JsonRpcResponse>(value)
                .map(JsonRpcMessage::Response)
                .map_err(|e| ErrorData::invalid_request(format!("invalid response: {e}")));
        }
        if object.contains_key("id") {
            return serde_json::from_value::<JsonRpcRequest>(value)
                .map(JsonRpcMessage::Request)
                .map_err(|e| ErrorData::invalid_request(format!("invalid request: {e}")));
        }
        serde_json::from_value::<JsonRpcNotification>(value)
            .map(JsonRpcMessage::Notification)
            .map_err(|e| ErrorData::invalid_request(format!("invalid notification: {e}")))
    }

    /// Parse a batch (`[...]`) into its member messages.
    ///
    /// An empty batch is an invalid request per JSON-RPC 2.0. Individual
    /// members that fail to classify are returned as `Err` entries so the
    /// dispatcher can answer each with the right error.
    pub fn parse_batch(raw: &[u8]) -> Result<Vec<Result<Self, ErrorData>>, ErrorData> {
        let value: Value = serde_json::from_slice(raw)
            .map_err(|e| ErrorData::parse_error(format!("Parse error: {e}")))?;
        let Value::Array(entries) = value else {
            return Err(ErrorData::invalid_request("expected a batch array"));
        };
        if entries.is_empty() {
            return Err(ErrorData::invalid_request("empty batch"));
        }
        Ok(entries.into_iter().map(Self::from_value).collect())
    }

    pub fn encode(&self) -> String {
        // Serialization of these shapes cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Name and version of one side of the connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

impl Implementation {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Parameters of the `initialize` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequestParam {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Capabilities,
    pub client_info: Implementation,
}

/// Result of a successful `initialize` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: Capabilities,
    pub server_info: Implementation,
}

/// Parameters of a `tools/call` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolRequestParam {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Parameters of a `notifications/progress` notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressNotificationParam {
    pub progress_token: RequestId,
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
}

/// Parameters of a `notifications/cancelled` notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelledNotificationParam {
    pub request_id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
