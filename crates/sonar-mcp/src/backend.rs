// crates/sonar-mcp/src/backend.rs
// ============================================================================
// Module: Analysis Backend
// Description: Interface to the embedded code-analysis engine.
// Purpose: Decouple background initialization from the analysis engine.
// Dependencies: async-trait, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! The analysis engine is consumed through [`AnalysisBackend`]: initialize
//! with an analyzer set (slow; may download plugins), submit analyses, and
//! shut down. [`backend_tools`] builds the tools that only become available
//! once background initialization has finished.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use sonar_mcp_config::ToolCategory;
use thiserror::Error;

use crate::schema::ObjectSchema;
use crate::schema::open_object;
use crate::tools::Tool;
use crate::tools::ToolCall;
use crate::tools::ToolDefinition;
use crate::tools::ToolError;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Normalized set of analyzer keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyzerSet(BTreeSet<String>);

impl AnalyzerSet {
    /// Builds a set from raw keys, trimming and lowercasing each entry.
    #[must_use]
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            keys.into_iter()
                .map(|key| key.as_ref().trim().to_ascii_lowercase())
                .filter(|key| !key.is_empty())
                .collect(),
        )
    }

    /// Returns true when the analyzer key is part of the set.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains(&key.trim().to_ascii_lowercase())
    }

    /// Iterates analyzer keys in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Returns the number of analyzers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when no analyzers are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Code snippet submitted for analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// Source text.
    pub content: String,
    /// Analyzer key (language).
    pub language: String,
    /// Optional file name used for rule applicability.
    pub file_name: Option<String>,
}

/// Single finding reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisIssue {
    /// Rule key.
    pub rule_key: String,
    /// Finding message.
    pub message: String,
    /// Severity label.
    pub severity: String,
    /// First line (1-based).
    pub start_line: Option<u32>,
    /// Last line (1-based).
    pub end_line: Option<u32>,
}

/// Analysis outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// Findings in backend order.
    pub issues: Vec<AnalysisIssue>,
}

/// Backend failures.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// Initialization failed.
    #[error("backend initialization failed: {0}")]
    Initialization(String),
    /// The requested analyzer is not installed.
    #[error("unsupported analyzer: {0}")]
    UnsupportedAnalyzer(String),
    /// Analysis failed.
    #[error("analysis failed: {0}")]
    Analysis(String),
    /// Shutdown failed.
    #[error("backend shutdown failed: {0}")]
    Shutdown(String),
}

impl From<BackendError> for ToolError {
    fn from(error: BackendError) -> Self {
        match error {
            BackendError::UnsupportedAnalyzer(_) => Self::InvalidArguments(error.to_string()),
            BackendError::Initialization(_) | BackendError::Shutdown(_) => {
                Self::Unavailable(error.to_string())
            }
            BackendError::Analysis(_) => Self::Internal(error.to_string()),
        }
    }
}

// ============================================================================
// SECTION: Backend Interface
// ============================================================================

/// Embedded code-analysis engine.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Prepares the engine for the given analyzers. May take tens of seconds.
    async fn initialize(&self, analyzers: &AnalyzerSet) -> Result<(), BackendError>;

    /// Analyzes a snippet.
    async fn analyze(&self, request: AnalysisRequest) -> Result<AnalysisReport, BackendError>;

    /// Stops the engine and releases its resources.
    async fn shutdown(&self) -> Result<(), BackendError>;
}

// ============================================================================
// SECTION: Backend Tools
// ============================================================================

/// Builds the tools that depend on an initialized backend.
#[must_use]
pub fn backend_tools(backend: Arc<dyn AnalysisBackend>) -> Vec<Tool> {
    let definition = ToolDefinition::new(
        "analyze_code_snippet",
        ToolCategory::Analysis,
        "Analyze a code snippet with the embedded analyzers and report issues.",
    )
    .title("Analyze Code Snippet")
    .read_only()
    .input_schema(
        ObjectSchema::new()
            .required_string("codeSnippet", "Source code to analyze.")
            .required_string("language", "Analyzer key, for example java or python.")
            .optional_string("fileName", "File name used to select applicable rules.")
            .build(),
    )
    .output_schema(open_object("Issues reported by the analyzers."));
    vec![Tool::new(definition, move |call| analyze_snippet(Arc::clone(&backend), call))]
}

/// Runs one snippet analysis.
async fn analyze_snippet(
    backend: Arc<dyn AnalysisBackend>,
    call: ToolCall,
) -> Result<Value, ToolError> {
    // Leading blank lines are kept so reported line numbers match the input.
    let content = match call.arguments.get("codeSnippet") {
        Some(Value::String(text)) if !text.trim().is_empty() => text.clone(),
        _ => {
            return Err(ToolError::InvalidArguments(
                "missing required argument: codeSnippet".to_string(),
            ));
        }
    };
    let request = AnalysisRequest {
        content,
        language: call.required_str("language")?.to_ascii_lowercase(),
        file_name: call.optional_str("fileName")?.map(str::to_string),
    };
    let report = backend.analyze(request).await?;
    serde_json::to_value(report).map_err(|err| ToolError::Internal(err.to_string()))
}

#[cfg(test)]
mod tests;
