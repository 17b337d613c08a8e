// crates/sonar-mcp/src/dispatch.rs
// ============================================================================
// Module: MCP Dispatcher
// Description: JSON-RPC method routing for MCP requests.
// Purpose: Route requests to the registry and executor for both transports.
// Dependencies: serde, serde_json, tracing
// ============================================================================

//! ## Overview
//! [`McpDispatcher`] implements the MCP methods the server supports:
//! `initialize`, `ping`, `tools/list`, and `tools/call`. Notifications are
//! accepted and never answered. Tool listing and tool resolution both go
//! through the registry filter for the caller's [`TransportContext`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;

use crate::context::TransportContext;
use crate::executor::ToolExecutor;
use crate::rpc::JsonRpcRequest;
use crate::rpc::JsonRpcResponse;
use crate::rpc::error_codes;
use crate::tools::ToolCall;
use crate::tools::ToolRegistry;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Protocol versions accepted from clients, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];
/// Version offered when the client asks for an unsupported one.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";
/// Usage hint returned from `initialize`.
const SERVER_INSTRUCTIONS: &str = "Tools for querying a SonarQube server or SonarQube Cloud \
                                   organization. Analysis tools appear once the embedded \
                                   analyzers finish loading.";

/// Returns true when a protocol version is supported.
#[must_use]
pub fn is_supported_protocol_version(version: &str) -> bool {
    SUPPORTED_PROTOCOL_VERSIONS.contains(&version)
}

// ============================================================================
// SECTION: Types
// ============================================================================

/// Server identity reported from `initialize`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    pub version: String,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: "sonar-mcp".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// `tools/call` parameters.
#[derive(Debug, Deserialize)]
struct ToolCallParams {
    /// Tool name.
    name: String,
    /// Tool arguments.
    #[serde(default)]
    arguments: Option<Map<String, Value>>,
}

/// `initialize` parameters.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeParams {
    /// Client-requested protocol version.
    #[serde(default)]
    protocol_version: Option<String>,
}

// ============================================================================
// SECTION: Dispatcher
// ============================================================================

/// JSON-RPC router shared by the stdio and HTTP transports.
#[derive(Clone)]
pub struct McpDispatcher {
    /// Tool catalog.
    registry: Arc<ToolRegistry>,
    /// Tool runner.
    executor: ToolExecutor,
    /// Identity reported to clients.
    server_info: ServerInfo,
}

impl McpDispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>, executor: ToolExecutor, server_info: ServerInfo) -> Self {
        Self {
            registry,
            executor,
            server_info,
        }
    }

    /// Returns the tool registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Handles one request. Returns `None` for notifications.
    pub async fn dispatch(
        &self,
        request: JsonRpcRequest,
        context: &TransportContext,
    ) -> Option<JsonRpcResponse> {
        if request.is_notification() {
            tracing::debug!(method = %request.method, "notification received");
            return None;
        }
        let id = request.id.unwrap_or_default();
        let response = match request.method.as_str() {
            "initialize" => self.initialize(id, request.params),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => self.list_tools(id, context),
            "tools/call" => self.call_tool(id, request.params, context).await,
            other => JsonRpcResponse::failure(
                id,
                error_codes::METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
            ),
        };
        Some(response)
    }

    /// Answers `initialize` with negotiated version and capabilities.
    fn initialize(&self, id: Value, params: Option<Value>) -> JsonRpcResponse {
        let params: InitializeParams = match params {
            Some(value) => match serde_json::from_value(value) {
                Ok(params) => params,
                Err(err) => {
                    return JsonRpcResponse::failure(
                        id,
                        error_codes::INVALID_PARAMS,
                        format!("Invalid params: {err}"),
                    );
                }
            },
            None => InitializeParams::default(),
        };
        let version = params
            .protocol_version
            .as_deref()
            .filter(|version| is_supported_protocol_version(version))
            .unwrap_or(LATEST_PROTOCOL_VERSION);
        JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": version,
                "capabilities": {
                    "tools": { "listChanged": true },
                },
                "serverInfo": self.server_info,
                "instructions": SERVER_INSTRUCTIONS,
            }),
        )
    }

    /// Answers `tools/list` for the caller's filter.
    fn list_tools(&self, id: Value, context: &TransportContext) -> JsonRpcResponse {
        let tools: Vec<Value> = self
            .registry
            .list(Some(context))
            .iter()
            .map(|tool| tool.definition().to_list_entry())
            .collect();
        JsonRpcResponse::success(id, json!({ "tools": tools }))
    }

    /// Answers `tools/call`; unknown and filtered tools are indistinguishable.
    async fn call_tool(
        &self,
        id: Value,
        params: Option<Value>,
        context: &TransportContext,
    ) -> JsonRpcResponse {
        let params: ToolCallParams = match params.map(serde_json::from_value) {
            Some(Ok(params)) => params,
            Some(Err(err)) => {
                return JsonRpcResponse::failure(
                    id,
                    error_codes::INVALID_PARAMS,
                    format!("Invalid params: {err}"),
                );
            }
            None => {
                return JsonRpcResponse::failure(
                    id,
                    error_codes::INVALID_PARAMS,
                    "Invalid params: missing tool name",
                );
            }
        };
        let Some(tool) = self.registry.resolve(&params.name, Some(context)) else {
            return JsonRpcResponse::failure(
                id,
                error_codes::INVALID_PARAMS,
                format!("Unknown tool: {}", params.name),
            );
        };
        let call = ToolCall {
            arguments: params.arguments.unwrap_or_default(),
            context: context.clone(),
        };
        let result = self.executor.execute(&tool, call).await;
        match serde_json::to_value(&result) {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(err) => JsonRpcResponse::failure(
                id,
                error_codes::INTERNAL_ERROR,
                format!("failed to serialize tool result: {err}"),
            ),
        }
    }
}
