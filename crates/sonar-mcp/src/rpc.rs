// crates/sonar-mcp/src/rpc.rs
// ============================================================================
// Module: JSON-RPC Envelope
// Description: JSON-RPC 2.0 request, response, and notification types.
// Purpose: Share one wire model between the stdio and HTTP transports.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Serde-derived JSON-RPC 2.0 envelopes. A request without an `id` is a
//! notification and never receives a response. Parsing failures are returned
//! as ready-to-send error responses with a null id.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// JSON-RPC protocol version literal.
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC error codes used by the server.
pub mod error_codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i64 = -32_700;
    /// The JSON sent is not a valid request object.
    pub const INVALID_REQUEST: i64 = -32_600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i64 = -32_601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i64 = -32_602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i64 = -32_603;
    /// Application-level authentication and authorization failures.
    pub const SERVER_ERROR: i64 = -32_000;
}

// ============================================================================
// SECTION: Envelope Types
// ============================================================================

/// JSON-RPC request or notification.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version literal.
    pub jsonrpc: String,
    /// Request identifier; absent for notifications. An explicit `null` is
    /// kept as `Some(Value::Null)` and still gets a response.
    #[serde(default, deserialize_with = "deserialize_present_id")]
    pub id: Option<Value>,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Returns true when the message expects no response.
    #[must_use]
    pub const fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Maps any present `id`, including `null`, to `Some`.
fn deserialize_present_id<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// JSON-RPC response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version literal.
    pub jsonrpc: String,
    /// Identifier echoed from the request (null when unknown).
    pub id: Value,
    /// Successful result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Builds a success response.
    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Builds an error response.
    #[must_use]
    pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// JSON-RPC error payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
}

/// Server-initiated JSON-RPC notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerNotification {
    /// The visible tool list changed.
    ToolListChanged,
}

impl ServerNotification {
    /// Returns the notification method name.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Self::ToolListChanged => "notifications/tools/list_changed",
        }
    }

    /// Renders the notification envelope.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "jsonrpc": JSONRPC_VERSION,
            "method": self.method(),
        })
    }
}

// ============================================================================
// SECTION: Parsing
// ============================================================================

/// Parses a raw message into a request.
///
/// # Errors
///
/// Returns a ready-to-send error response: `-32700` for invalid JSON and
/// `-32600` for a value that is not a JSON-RPC 2.0 request object.
pub fn parse_request(bytes: &[u8]) -> Result<JsonRpcRequest, Box<JsonRpcResponse>> {
    let value: Value = serde_json::from_slice(bytes).map_err(|_| {
        Box::new(JsonRpcResponse::failure(Value::Null, error_codes::PARSE_ERROR, "Parse error"))
    })?;
    let id = value.get("id").cloned().unwrap_or(Value::Null);
    let request: JsonRpcRequest = serde_json::from_value(value).map_err(|_| {
        Box::new(JsonRpcResponse::failure(
            id.clone(),
            error_codes::INVALID_REQUEST,
            "Invalid Request",
        ))
    })?;
    if request.jsonrpc != JSONRPC_VERSION {
        return Err(Box::new(JsonRpcResponse::failure(
            id,
            error_codes::INVALID_REQUEST,
            "Invalid Request: jsonrpc must be \"2.0\"",
        )));
    }
    Ok(request)
}

/// Builds the JSON value of an error response with a null id.
#[must_use]
pub fn error_body(code: i64, message: &str) -> Value {
    serde_json::json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": Value::Null,
        "error": {
            "code": code,
            "message": message,
        },
    })
}
