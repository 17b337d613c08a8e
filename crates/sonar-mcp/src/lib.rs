// crates/sonar-mcp/src/lib.rs
// ============================================================================
// Module: Sonar MCP
// Description: MCP server exposing SonarQube tools over stdio and HTTP.
// Purpose: Provide the transport, security, and tool plumbing of the server.
// Dependencies: sonar-mcp-config, axum, axum-server, reqwest, tokio
// ============================================================================

//! ## Overview
//! Sonar MCP serves a catalog of SonarQube tools over JSON-RPC 2.0. The stdio
//! transport serves one local client with a process-wide credential; the
//! HTTP transport is stateless and authenticates every request on its own.
//! Both transports route through [`dispatch::McpDispatcher`], which resolves
//! tools in [`tools::ToolRegistry`] under the caller's filter and runs them
//! through [`executor::ToolExecutor`].
//!
//! Security posture: request headers and bodies are untrusted. Origin,
//! credential, organization, and override checks all run before dispatch.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod auth;
pub mod backend;
pub mod builtin;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod executor;
pub mod http;
pub mod lifecycle;
pub mod rpc;
pub mod schema;
pub mod security;
pub mod session;
pub mod stdio;
pub mod telemetry;
pub mod tools;
pub mod upstream;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::AuthAuditEvent;
pub use audit::AuthAuditSink;
pub use audit::NoopAuthAuditSink;
pub use audit::TracingAuthAuditSink;
pub use auth::AuthenticationFilter;
pub use auth::OrganizationPolicy;
pub use backend::AnalysisBackend;
pub use backend::AnalyzerSet;
pub use backend::BackendError;
pub use context::Credential;
pub use context::TransportContext;
pub use dispatch::McpDispatcher;
pub use executor::ToolCallResult;
pub use executor::ToolExecutor;
pub use http::HttpTransport;
pub use lifecycle::InitializationState;
pub use lifecycle::ServerComponents;
pub use lifecycle::ServerError;
pub use lifecycle::ServerLifecycle;
pub use security::SecurityFilter;
pub use session::SessionTokenStore;
pub use stdio::StdioSession;
pub use telemetry::NoopTelemetry;
pub use telemetry::TelemetrySink;
pub use telemetry::TracingTelemetry;
pub use tools::Tool;
pub use tools::ToolDefinition;
pub use tools::ToolError;
pub use tools::ToolRegistry;
