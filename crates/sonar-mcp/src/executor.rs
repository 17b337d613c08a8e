// crates/sonar-mcp/src/executor.rs
// ============================================================================
// Module: Tool Executor
// Description: Runs tools, classifies failures, and emits telemetry.
// Purpose: Keep tool failures inside Result values at the transport boundary.
// Dependencies: serde, serde_json, tokio, tracing
// ============================================================================

//! ## Overview
//! [`ToolExecutor::execute`] runs one tool to completion and always returns a
//! [`ToolCallResult`]. Failures, including handler panics, are classified
//! into a single user-facing message. One [`ToolInvokedEvent`] is emitted per
//! call regardless of outcome.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;

use crate::telemetry::TelemetrySink;
use crate::telemetry::ToolInvokedEvent;
use crate::tools::Tool;
use crate::tools::ToolCall;
use crate::tools::ToolError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Remediation appended to unauthorized failures.
const UNAUTHORIZED_HINT: &str = "Check that the SonarQube token is valid and has not expired.";
/// Remediation appended to forbidden failures.
const FORBIDDEN_HINT: &str =
    "The token is valid but lacks permission; ask an administrator to grant access.";
/// Remediation appended to not-found failures.
const NOT_FOUND_HINT: &str = "Verify the project, issue, or organization key is correct.";

// ============================================================================
// SECTION: Results
// ============================================================================

/// Content block of a tool result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    /// Plain text content.
    Text {
        /// Text payload.
        text: String,
    },
}

/// `tools/call` result payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    /// Content blocks.
    pub content: Vec<ToolContent>,
    /// Structured output on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    /// True when the call failed.
    pub is_error: bool,
}

impl ToolCallResult {
    /// Builds a success result with structured output and a text rendering.
    #[must_use]
    pub fn success(value: Value) -> Self {
        let text = serde_json::to_string(&value).unwrap_or_else(|_| value.to_string());
        let structured_content = value.is_object().then_some(value);
        Self {
            content: vec![ToolContent::Text {
                text,
            }],
            structured_content,
            is_error: false,
        }
    }

    /// Builds a failure result carrying one message.
    #[must_use]
    pub fn failure(message: String) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: message,
            }],
            structured_content: None,
            is_error: true,
        }
    }

    /// Returns the first text block.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.content.first().map(|ToolContent::Text { text }| text.as_str())
    }
}

/// Renders the user-facing message for a tool failure.
#[must_use]
pub fn user_message(error: &ToolError) -> String {
    match error {
        ToolError::Unauthorized(message) => {
            format!("Not authorized: {message}. {UNAUTHORIZED_HINT}")
        }
        ToolError::Forbidden(message) => format!("Forbidden: {message}. {FORBIDDEN_HINT}"),
        ToolError::NotFound(message) => format!("Not found: {message}. {NOT_FOUND_HINT}"),
        ToolError::Protocol(message) | ToolError::Internal(message) => message.clone(),
        ToolError::InvalidArguments(_) | ToolError::Unavailable(_) => error.to_string(),
    }
}

// ============================================================================
// SECTION: Executor
// ============================================================================

/// Tool dispatcher with failure classification and telemetry.
#[derive(Clone)]
pub struct ToolExecutor {
    /// Completion event sink.
    telemetry: Arc<dyn TelemetrySink>,
}

impl ToolExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new(telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self {
            telemetry,
        }
    }

    /// Runs a tool to completion.
    ///
    /// The handler runs on its own task so a panic is reported as a failure
    /// result instead of unwinding into the transport.
    pub async fn execute(&self, tool: &Tool, call: ToolCall) -> ToolCallResult {
        let started = Instant::now();
        let outcome = match tokio::spawn(tool.invoke(call)).await {
            Ok(result) => result,
            Err(join_error) => Err(ToolError::Internal(format!(
                "tool {} terminated unexpectedly: {join_error}",
                tool.name()
            ))),
        };
        let event = ToolInvokedEvent::new(tool.name(), outcome.is_ok(), started.elapsed());
        if let Err(err) = self.telemetry.tool_invoked(&event) {
            tracing::warn!(tool = tool.name(), error = %err, "telemetry sink failed");
        }
        match outcome {
            Ok(value) => ToolCallResult::success(value),
            Err(error) => {
                tracing::debug!(tool = tool.name(), error = %error, "tool call failed");
                ToolCallResult::failure(user_message(&error))
            }
        }
    }
}

#[cfg(test)]
mod tests;
