// crates/sonar-mcp/src/executor/tests.rs
// ============================================================================
// Module: Tool Executor Unit Tests
// Description: Unit tests for failure classification and telemetry emission.
// Purpose: Validate that every call yields a result and one telemetry event.
// Dependencies: sonar-mcp
// ============================================================================

//! ## Overview
//! Exercises success rendering, the failure taxonomy, panic containment, and
//! telemetry sink failures.

// ============================================================================
// SECTION: Lint Configuration
// ============================================================================

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only assertions."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;

use serde_json::Map;
use serde_json::json;
use sonar_mcp_config::ToolCategory;

use super::ToolCallResult;
use super::ToolExecutor;
use super::user_message;
use crate::context::Credential;
use crate::context::TransportContext;
use crate::telemetry::TelemetryError;
use crate::telemetry::TelemetrySink;
use crate::telemetry::ToolInvokedEvent;
use crate::tools::Tool;
use crate::tools::ToolCall;
use crate::tools::ToolDefinition;
use crate::tools::ToolError;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

#[derive(Default)]
struct RecordingTelemetry {
    events: Mutex<Vec<ToolInvokedEvent>>,
}

impl TelemetrySink for RecordingTelemetry {
    fn tool_invoked(&self, event: &ToolInvokedEvent) -> Result<(), TelemetryError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

struct FailingTelemetry;

impl TelemetrySink for FailingTelemetry {
    fn tool_invoked(&self, _event: &ToolInvokedEvent) -> Result<(), TelemetryError> {
        Err(TelemetryError("sink offline".to_string()))
    }
}

fn call() -> ToolCall {
    ToolCall {
        arguments: Map::new(),
        context: TransportContext::new(Credential::new("squ_test"), None),
    }
}

fn failing_tool(error: ToolError) -> Tool {
    Tool::new(ToolDefinition::new("failing", ToolCategory::Issues, "fails"), move |_call| {
        let error = error.clone();
        async move { Err(error) }
    })
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[tokio::test]
async fn success_returns_structured_content_and_emits_event() {
    let telemetry = Arc::new(RecordingTelemetry::default());
    let executor = ToolExecutor::new(Arc::clone(&telemetry) as Arc<dyn TelemetrySink>);
    let tool = Tool::new(ToolDefinition::new("status", ToolCategory::System, "ok"), |_call| async {
        Ok(json!({"status": "UP"}))
    });
    let result = executor.execute(&tool, call()).await;
    assert!(!result.is_error);
    assert_eq!(result.structured_content, Some(json!({"status": "UP"})));
    assert_eq!(result.text(), Some("{\"status\":\"UP\"}"));
    let events = telemetry.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].tool_key, "sonar_mcp/status");
    assert!(events[0].success);
}

#[tokio::test]
async fn failure_is_classified_and_emits_event() {
    let telemetry = Arc::new(RecordingTelemetry::default());
    let executor = ToolExecutor::new(Arc::clone(&telemetry) as Arc<dyn TelemetrySink>);
    let tool = failing_tool(ToolError::Forbidden("missing Browse permission".to_string()));
    let result = executor.execute(&tool, call()).await;
    assert!(result.is_error);
    let text = result.text().unwrap();
    assert!(text.contains("missing Browse permission"));
    assert!(text.contains("lacks permission"));
    let events = telemetry.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert!(!events[0].success);
}

#[tokio::test]
async fn panicking_tool_becomes_failure_result() {
    let executor = ToolExecutor::new(Arc::new(crate::telemetry::NoopTelemetry));
    let tool = Tool::new(ToolDefinition::new("boom", ToolCategory::External, "panics"), |_call| async {
        panic!("handler exploded")
    });
    let result = executor.execute(&tool, call()).await;
    assert!(result.is_error);
    assert!(result.text().unwrap().contains("terminated unexpectedly"));
}

#[tokio::test]
async fn telemetry_failure_does_not_change_result() {
    let executor = ToolExecutor::new(Arc::new(FailingTelemetry));
    let tool = Tool::new(ToolDefinition::new("ok", ToolCategory::System, "ok"), |_call| async {
        Ok(json!({"fine": true}))
    });
    let result = executor.execute(&tool, call()).await;
    assert!(!result.is_error);
}

#[test]
fn taxonomy_messages() {
    let unauthorized = user_message(&ToolError::Unauthorized("token rejected".to_string()));
    assert!(unauthorized.contains("token rejected"));
    assert!(unauthorized.contains("token is valid and has not expired"));

    let not_found = user_message(&ToolError::NotFound("project foo".to_string()));
    assert!(not_found.contains("project foo"));
    assert!(not_found.contains("Verify the project"));

    let protocol = user_message(&ToolError::Protocol("Component key 'x' not found".to_string()));
    assert_eq!(protocol, "Component key 'x' not found");

    let internal = user_message(&ToolError::Internal("socket closed".to_string()));
    assert_eq!(internal, "socket closed");

    let invalid = user_message(&ToolError::InvalidArguments("missing key".to_string()));
    assert_eq!(invalid, "invalid arguments: missing key");
}

#[test]
fn non_object_success_has_no_structured_content() {
    let result = ToolCallResult::success(json!(["a", "b"]));
    assert!(result.structured_content.is_none());
    assert_eq!(result.text(), Some("[\"a\",\"b\"]"));
    let rendered = serde_json::to_value(&result).unwrap();
    assert_eq!(rendered["isError"], false);
    assert!(rendered.get("structuredContent").is_none());
    assert_eq!(rendered["content"][0]["type"], "text");
}
