// crates/sonar-mcp/src/tools.rs
// ============================================================================
// Module: Tool Registry
// Description: Tool descriptors, handlers, and category/read-only filtering.
// Purpose: Hold the append-only tool catalog and apply enablement filters.
// Dependencies: serde, serde_json, sonar-mcp-config, thiserror
// ============================================================================

//! ## Overview
//! A [`Tool`] is an immutable [`ToolDefinition`] paired with an async handler
//! function. The [`ToolRegistry`] is append-only: tools are added during fast
//! startup and again when background initialization completes. Listing and
//! resolution share one [`ToolFilter`] predicate so a client can never call a
//! tool it could not see.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::RwLock;

use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use sonar_mcp_config::ToolCategory;
use sonar_mcp_config::ToolsConfig;
use thiserror::Error;

use crate::context::TransportContext;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum tool name length.
pub const MAX_TOOL_NAME_LENGTH: usize = 64;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Failure raised while running a tool.
///
/// The executor turns each variant into a single user-facing message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    /// Missing or rejected upstream credential.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Valid credential without sufficient rights.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Referenced resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Upstream returned a malformed or error-bearing exchange.
    #[error("{0}")]
    Protocol(String),
    /// Caller supplied invalid arguments.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    /// A collaborator is not reachable or not ready.
    #[error("unavailable: {0}")]
    Unavailable(String),
    /// Any other failure.
    #[error("{0}")]
    Internal(String),
}

/// Tool registration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Tool name violates the naming rules.
    #[error("invalid tool name '{name}': {reason}")]
    InvalidName {
        /// Offending name.
        name: String,
        /// Violated rule.
        reason: &'static str,
    },
    /// A tool with the same name is already registered.
    #[error("duplicate tool name: {0}")]
    Duplicate(String),
}

// ============================================================================
// SECTION: Tool Definition
// ============================================================================

/// Immutable tool descriptor.
///
/// # Invariants
/// - `name` satisfies [`validate_tool_name`] once registered.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// Human-readable title.
    pub title: String,
    /// Description shown to clients.
    pub description: String,
    /// Category governing bulk enablement.
    pub category: ToolCategory,
    /// True when the tool never mutates upstream state.
    pub read_only: bool,
    /// JSON schema for arguments.
    pub input_schema: Value,
    /// JSON schema for structured output.
    pub output_schema: Option<Value>,
}

impl ToolDefinition {
    /// Starts a definition with an empty argument schema.
    #[must_use]
    pub fn new(name: &str, category: ToolCategory, description: &str) -> Self {
        Self {
            name: name.to_string(),
            title: name.to_string(),
            description: description.to_string(),
            category,
            read_only: false,
            input_schema: crate::schema::ObjectSchema::new().build(),
            output_schema: None,
        }
    }

    /// Sets the human-readable title.
    #[must_use]
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    /// Marks the tool as read-only.
    #[must_use]
    pub const fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Sets the input schema.
    #[must_use]
    pub fn input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    /// Sets the output schema.
    #[must_use]
    pub fn output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Renders the `tools/list` entry for this tool.
    #[must_use]
    pub fn to_list_entry(&self) -> Value {
        let mut entry = json!({
            "name": self.name,
            "title": self.title,
            "description": self.description,
            "inputSchema": self.input_schema,
            "annotations": {
                "title": self.title,
                "readOnlyHint": self.read_only,
            },
        });
        if let (Some(schema), Value::Object(map)) = (&self.output_schema, &mut entry) {
            map.insert("outputSchema".to_string(), schema.clone());
        }
        entry
    }
}

// ============================================================================
// SECTION: Tool Handlers
// ============================================================================

/// Boxed future returned by tool handlers.
pub type ToolFuture = Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send>>;

/// Tool handler function value.
pub type ToolHandler = Arc<dyn Fn(ToolCall) -> ToolFuture + Send + Sync>;

/// Arguments and caller context of one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Call arguments.
    pub arguments: Map<String, Value>,
    /// Caller context.
    pub context: TransportContext,
}

impl ToolCall {
    /// Returns a required, non-blank string argument.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::InvalidArguments`] when the argument is missing,
    /// blank, or not a string.
    pub fn required_str(&self, name: &str) -> Result<&str, ToolError> {
        self.optional_str(name)?
            .ok_or_else(|| ToolError::InvalidArguments(format!("missing required argument: {name}")))
    }

    /// Returns an optional, non-blank string argument.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::InvalidArguments`] when the argument is not a string.
    pub fn optional_str(&self, name: &str) -> Result<Option<&str>, ToolError> {
        match self.arguments.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(value)) => {
                let trimmed = value.trim();
                Ok((!trimmed.is_empty()).then_some(trimmed))
            }
            Some(_) => Err(ToolError::InvalidArguments(format!("{name} must be a string"))),
        }
    }

    /// Returns an optional non-negative integer argument.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::InvalidArguments`] when the argument is not an
    /// unsigned integer.
    pub fn optional_u64(&self, name: &str) -> Result<Option<u64>, ToolError> {
        match self.arguments.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value.as_u64().map(Some).ok_or_else(|| {
                ToolError::InvalidArguments(format!("{name} must be a non-negative integer"))
            }),
        }
    }
}

/// Registered tool: descriptor plus handler.
#[derive(Clone)]
pub struct Tool {
    /// Immutable descriptor.
    definition: ToolDefinition,
    /// Execution function.
    handler: ToolHandler,
}

impl Tool {
    /// Pairs a definition with an async handler.
    pub fn new<F, Fut>(definition: ToolDefinition, handler: F) -> Self
    where
        F: Fn(ToolCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        Self {
            definition,
            handler: Arc::new(move |call| -> ToolFuture { Box::pin(handler(call)) }),
        }
    }

    /// Returns the tool descriptor.
    #[must_use]
    pub const fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    /// Returns the tool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Starts the handler for one call.
    #[must_use]
    pub fn invoke(&self, call: ToolCall) -> ToolFuture {
        (self.handler)(call)
    }
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool").field("definition", &self.definition).finish_non_exhaustive()
    }
}

/// Validates a tool name against the length and charset rules.
///
/// # Errors
///
/// Returns [`RegistryError::InvalidName`] when the name is empty, longer than
/// 64 characters, or uses characters outside `[A-Za-z0-9_.\-/]`.
pub fn validate_tool_name(name: &str) -> Result<(), RegistryError> {
    let invalid = |reason| RegistryError::InvalidName {
        name: name.to_string(),
        reason,
    };
    if name.is_empty() {
        return Err(invalid("name must be non-empty"));
    }
    if name.len() > MAX_TOOL_NAME_LENGTH {
        return Err(invalid("name exceeds 64 characters"));
    }
    let allowed = |byte: u8| byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'.' | b'-' | b'/');
    if !name.bytes().all(allowed) {
        return Err(invalid("name contains characters outside [A-Za-z0-9_.-/]"));
    }
    Ok(())
}

// ============================================================================
// SECTION: Tool Filter
// ============================================================================

/// Category and read-only enablement filter.
///
/// # Invariants
/// - [`ToolCategory::Projects`] is always admitted by the category check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolFilter {
    /// Enabled categories; `None` enables all.
    categories: Option<BTreeSet<ToolCategory>>,
    /// Only read-only tools pass when set.
    read_only: bool,
}

impl ToolFilter {
    /// Builds a filter from explicit settings.
    #[must_use]
    pub const fn new(categories: Option<BTreeSet<ToolCategory>>, read_only: bool) -> Self {
        Self {
            categories,
            read_only,
        }
    }

    /// Builds the global filter from tool configuration.
    #[must_use]
    pub fn from_config(config: &ToolsConfig) -> Self {
        Self::new(config.category_set(), config.read_only)
    }

    /// Narrows this filter with the per-request overrides of a context.
    ///
    /// Override categories are intersected with the enabled set; a read-only
    /// override can only tighten the global flag.
    #[must_use]
    pub fn narrowed(&self, context: &TransportContext) -> Self {
        let categories = match (&self.categories, &context.toolset_override) {
            (global, None) => global.clone(),
            (None, Some(requested)) => Some(requested.clone()),
            (Some(global), Some(requested)) => {
                Some(global.intersection(requested).copied().collect())
            }
        };
        Self {
            categories,
            read_only: self.read_only || context.read_only_override.unwrap_or(false),
        }
    }

    /// Returns true when the definition passes both checks.
    #[must_use]
    pub fn admits(&self, definition: &ToolDefinition) -> bool {
        let category_enabled = definition.category == ToolCategory::Projects
            || self.categories.as_ref().is_none_or(|set| set.contains(&definition.category));
        category_enabled && (!self.read_only || definition.read_only)
    }
}

// ============================================================================
// SECTION: Tool Registry
// ============================================================================

/// Append-only tool catalog.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    /// Registered tools keyed by name.
    tools: RwLock<BTreeMap<String, Arc<Tool>>>,
    /// Globally configured filter.
    filter: ToolFilter,
}

impl ToolRegistry {
    /// Creates an empty registry with the global filter.
    #[must_use]
    pub fn new(filter: ToolFilter) -> Self {
        Self {
            tools: RwLock::new(BTreeMap::new()),
            filter,
        }
    }

    /// Returns the global filter.
    #[must_use]
    pub const fn filter(&self) -> &ToolFilter {
        &self.filter
    }

    /// Registers one tool.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] for invalid or duplicate names.
    pub fn register(&self, tool: Tool) -> Result<(), RegistryError> {
        self.register_all(vec![tool])
    }

    /// Registers a batch of tools atomically.
    ///
    /// Either every tool is added or none is.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] for invalid or duplicate names.
    pub fn register_all(&self, tools: Vec<Tool>) -> Result<(), RegistryError> {
        let mut guard = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        let mut seen = BTreeSet::new();
        for tool in &tools {
            validate_tool_name(tool.name())?;
            if guard.contains_key(tool.name()) || !seen.insert(tool.name().to_string()) {
                return Err(RegistryError::Duplicate(tool.name().to_string()));
            }
        }
        for tool in tools {
            guard.insert(tool.name().to_string(), Arc::new(tool));
        }
        Ok(())
    }

    /// Returns the tools visible to a caller, sorted by name.
    #[must_use]
    pub fn list(&self, context: Option<&TransportContext>) -> Vec<Arc<Tool>> {
        let filter = self.effective_filter(context);
        let guard = self.tools.read().unwrap_or_else(PoisonError::into_inner);
        guard.values().filter(|tool| filter.admits(tool.definition())).cloned().collect()
    }

    /// Resolves a tool by name under the same filter as [`ToolRegistry::list`].
    #[must_use]
    pub fn resolve(&self, name: &str, context: Option<&TransportContext>) -> Option<Arc<Tool>> {
        let filter = self.effective_filter(context);
        let guard = self.tools.read().unwrap_or_else(PoisonError::into_inner);
        guard.get(name).filter(|tool| filter.admits(tool.definition())).cloned()
    }

    /// Returns the total number of registered tools, ignoring filters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true when no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the filter for a caller.
    fn effective_filter(&self, context: Option<&TransportContext>) -> ToolFilter {
        context.map_or_else(|| self.filter.clone(), |context| self.filter.narrowed(context))
    }
}
