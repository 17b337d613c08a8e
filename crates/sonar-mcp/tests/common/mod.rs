// crates/sonar-mcp/tests/common/mod.rs
// ============================================================================
// Module: Common Test Fixtures
// Description: Shared fixtures for sonar-mcp integration tests.
// Purpose: Provide configs, fake collaborators, and HTTP request helpers.
// Dependencies: sonar-mcp, axum, tower
// ============================================================================

//! ## Overview
//! Shared fixtures: configuration builders, an in-memory analysis backend
//! with call counters, a context-echo tool, and helpers that drive the HTTP
//! router in-process.

#![allow(dead_code, reason = "Shared test helpers may be unused in some cases.")]
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::unwrap_in_result,
    reason = "Test fixtures favor direct unwraps for setup clarity."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::HeaderMap;
use axum::http::Method;
use axum::http::Request;
use axum::http::StatusCode;
use serde_json::Value;
use serde_json::json;
use sonar_mcp::AnalysisBackend;
use sonar_mcp::AnalyzerSet;
use sonar_mcp::BackendError;
use sonar_mcp::NoopAuthAuditSink;
use sonar_mcp::NoopTelemetry;
use sonar_mcp::ServerComponents;
use sonar_mcp::ServerLifecycle;
use sonar_mcp::Tool;
use sonar_mcp::ToolDefinition;
use sonar_mcp::backend::AnalysisIssue;
use sonar_mcp::backend::AnalysisReport;
use sonar_mcp::backend::AnalysisRequest;
use sonar_mcp::config::ServerTransport;
use sonar_mcp::config::SonarMcpConfig;
use sonar_mcp::config::ToolCategory;
use tower::ServiceExt;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Token used by stdio fixtures.
pub const STDIO_TOKEN: &str = "squ_stdio_fixture";

/// Stdio configuration with a process-wide token.
pub fn stdio_config() -> SonarMcpConfig {
    let mut config = SonarMcpConfig::default();
    config.upstream.token = Some(STDIO_TOKEN.to_string());
    config.lifecycle.stdio_close_grace_ms = 500;
    config.lifecycle.init_shutdown_wait_ms = 500;
    config
}

/// Loopback HTTP configuration on the given port.
pub fn http_config(port: u32) -> SonarMcpConfig {
    let mut config = SonarMcpConfig::default();
    config.server.transport = ServerTransport::Http;
    config.server.http.host = "127.0.0.1".to_string();
    config.server.http.port = port;
    config.server.max_body_bytes = 4 * 1024;
    config.lifecycle.init_shutdown_wait_ms = 500;
    config
}

/// Reserves a free loopback port and releases it for the server to bind.
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Components with silent sinks, an optional backend, and the echo tool.
pub fn components(backend: Option<Arc<FakeBackend>>) -> ServerComponents {
    ServerComponents {
        backend: backend.map(|backend| backend as Arc<dyn AnalysisBackend>),
        telemetry: Arc::new(NoopTelemetry),
        auth_audit: Arc::new(NoopAuthAuditSink),
        extra_tools: vec![describe_request_tool()],
    }
}

/// Builds a lifecycle from a configuration and optional backend.
pub fn lifecycle(config: SonarMcpConfig, backend: Option<Arc<FakeBackend>>) -> ServerLifecycle {
    ServerLifecycle::new(config, components(backend)).unwrap()
}

// ============================================================================
// SECTION: Fake Collaborators
// ============================================================================

/// Read-only tool that echoes the per-request context.
pub fn describe_request_tool() -> Tool {
    let definition = ToolDefinition::new(
        "describe_request",
        ToolCategory::Issues,
        "Echo the organization and overrides of the calling context.",
    )
    .read_only();
    Tool::new(definition, |call| async move {
        let toolsets: Option<Vec<&str>> = call
            .context
            .toolset_override
            .as_ref()
            .map(|set| set.iter().map(|category| category.key()).collect());
        Ok(json!({
            "organization": call.context.organization,
            "toolsets": toolsets,
            "readOnly": call.context.read_only_override,
        }))
    })
}

/// In-memory analysis backend with call counters.
#[derive(Debug, Default)]
pub struct FakeBackend {
    /// Fails `initialize` when set.
    pub fail_init: bool,
    /// Panics inside `initialize` when set.
    pub panic_init: bool,
    /// Delay before `initialize` completes.
    pub init_delay: Duration,
    /// Number of `initialize` calls.
    pub init_calls: AtomicUsize,
    /// Number of `analyze` calls.
    pub analyze_calls: AtomicUsize,
    /// Number of `shutdown` calls.
    pub shutdown_calls: AtomicUsize,
}

impl FakeBackend {
    /// Backend whose initialization succeeds after `delay`.
    pub fn ready_after(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            init_delay: delay,
            ..Self::default()
        })
    }

    /// Backend whose initialization fails.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail_init: true,
            ..Self::default()
        })
    }

    /// Backend whose initialization panics.
    pub fn panicking() -> Arc<Self> {
        Arc::new(Self {
            panic_init: true,
            ..Self::default()
        })
    }
}

#[async_trait]
impl AnalysisBackend for FakeBackend {
    async fn initialize(&self, analyzers: &AnalyzerSet) -> Result<(), BackendError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.init_delay).await;
        if self.panic_init {
            panic!("analyzer bundle is corrupt");
        }
        if self.fail_init {
            return Err(BackendError::Initialization("analyzer download failed".to_string()));
        }
        if analyzers.is_empty() {
            return Err(BackendError::Initialization("no analyzers".to_string()));
        }
        Ok(())
    }

    async fn analyze(&self, request: AnalysisRequest) -> Result<AnalysisReport, BackendError> {
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);
        if request.language != "python" {
            return Err(BackendError::UnsupportedAnalyzer(request.language));
        }
        let issues = request
            .content
            .lines()
            .enumerate()
            .filter(|(_, line)| line.contains("TODO"))
            .map(|(index, _)| {
                let line = u32::try_from(index + 1).unwrap();
                AnalysisIssue {
                    rule_key: "python:S1135".to_string(),
                    message: "Complete the task associated to this TODO comment.".to_string(),
                    severity: "INFO".to_string(),
                    start_line: Some(line),
                    end_line: Some(line),
                }
            })
            .collect();
        Ok(AnalysisReport {
            issues,
        })
    }

    async fn shutdown(&self) -> Result<(), BackendError> {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// SECTION: HTTP Helpers
// ============================================================================

/// Response captured from the in-process router.
#[derive(Debug)]
pub struct Captured {
    /// HTTP status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Decoded JSON body, or null when empty.
    pub body: Value,
}

/// Builds a JSON-RPC `POST /mcp` request with extra headers.
pub fn rpc_request(headers: &[(&str, &str)], body: &Value) -> Request<Body> {
    raw_request(Method::POST, headers, Body::from(body.to_string()))
}

/// Builds a request to `/mcp` with any method and body.
pub fn raw_request(method: Method, headers: &[(&str, &str)], body: Body) -> Request<Body> {
    let mut builder =
        Request::builder().method(method).uri("/mcp").header("content-type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(body).unwrap()
}

/// Sends one request through a clone of the router.
pub async fn send(router: &Router, request: Request<Body>) -> Captured {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    Captured {
        status,
        headers,
        body,
    }
}

/// Returns sorted tool names from a `tools/list` result.
pub fn tool_names(body: &Value) -> Vec<String> {
    body["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|tool| tool["name"].as_str().unwrap().to_string())
        .collect()
}

/// `tools/list` request body.
pub fn list_tools_body() -> Value {
    json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"})
}

/// `tools/call` request body.
pub fn call_tool_body(name: &str, arguments: &Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 2,
        "method": "tools/call",
        "params": {"name": name, "arguments": arguments},
    })
}
