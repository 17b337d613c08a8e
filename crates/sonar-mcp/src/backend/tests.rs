// crates/sonar-mcp/src/backend/tests.rs
// ============================================================================
// Module: Analysis Backend Unit Tests
// Description: Unit tests for analyzer sets and the snippet analysis tool.
// Purpose: Validate argument checks and backend error classification.
// Dependencies: sonar-mcp, async-trait, tokio
// ============================================================================

//! ## Overview
//! Drives the analysis tool against a recording backend.

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

use async_trait::async_trait;
use serde_json::Value;
use serde_json::json;

use super::AnalysisBackend;
use super::AnalysisIssue;
use super::AnalysisReport;
use super::AnalysisRequest;
use super::AnalyzerSet;
use super::BackendError;
use super::backend_tools;
use crate::context::Credential;
use crate::context::TransportContext;
use crate::tools::ToolCall;
use crate::tools::ToolError;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Backend that records requests and supports only java.
#[derive(Default)]
struct RecordingBackend {
    /// Accepted requests in arrival order.
    requests: Mutex<Vec<AnalysisRequest>>,
}

#[async_trait]
impl AnalysisBackend for RecordingBackend {
    async fn initialize(&self, _analyzers: &AnalyzerSet) -> Result<(), BackendError> {
        Ok(())
    }

    async fn analyze(&self, request: AnalysisRequest) -> Result<AnalysisReport, BackendError> {
        if request.language != "java" {
            return Err(BackendError::UnsupportedAnalyzer(request.language));
        }
        self.requests.lock().unwrap().push(request);
        Ok(AnalysisReport {
            issues: vec![AnalysisIssue {
                rule_key: "java:S106".to_string(),
                message: "Replace this use of System.out by a logger.".to_string(),
                severity: "MAJOR".to_string(),
                start_line: Some(3),
                end_line: Some(3),
            }],
        })
    }

    async fn shutdown(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Builds a stdio-context call.
fn call(arguments: &Value) -> ToolCall {
    ToolCall {
        arguments: arguments.as_object().cloned().unwrap(),
        context: TransportContext::new(Credential::new("squ_test"), None),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn analyzer_keys_are_normalized() {
    let set = AnalyzerSet::from_keys([" Java", "python", "", "JAVA"]);
    assert_eq!(set.len(), 2);
    assert!(set.contains("JAVA"));
    assert_eq!(set.iter().collect::<Vec<_>>(), vec!["java", "python"]);
}

#[test]
fn backend_errors_map_to_tool_errors() {
    assert!(matches!(
        ToolError::from(BackendError::UnsupportedAnalyzer("cobol".to_string())),
        ToolError::InvalidArguments(_)
    ));
    assert!(matches!(
        ToolError::from(BackendError::Initialization("down".to_string())),
        ToolError::Unavailable(_)
    ));
    assert!(matches!(
        ToolError::from(BackendError::Analysis("crash".to_string())),
        ToolError::Internal(_)
    ));
}

#[tokio::test]
async fn snippet_is_forwarded_with_lowercased_language() {
    let backend = Arc::new(RecordingBackend::default());
    let tools = backend_tools(backend.clone());
    assert_eq!(tools.len(), 1);
    assert!(tools[0].definition().read_only);

    let output = tools[0]
        .invoke(call(&json!({
            "codeSnippet": "\n\nSystem.out.println(1);",
            "language": "Java",
            "fileName": "Main.java",
        })))
        .await
        .unwrap();
    assert_eq!(output["issues"][0]["ruleKey"], "java:S106");

    let requests = backend.requests.lock().unwrap();
    assert_eq!(requests[0].language, "java");
    assert_eq!(requests[0].content, "\n\nSystem.out.println(1);");
    assert_eq!(requests[0].file_name.as_deref(), Some("Main.java"));
}

#[tokio::test]
async fn blank_snippet_is_invalid() {
    let tools = backend_tools(Arc::new(RecordingBackend::default()));
    let result = tools[0].invoke(call(&json!({"codeSnippet": "  ", "language": "java"}))).await;
    assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
}

#[tokio::test]
async fn unsupported_language_is_invalid_arguments() {
    let tools = backend_tools(Arc::new(RecordingBackend::default()));
    let result = tools[0].invoke(call(&json!({"codeSnippet": "x", "language": "cobol"}))).await;
    assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
}
