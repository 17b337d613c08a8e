// crates/sonar-mcp/src/builtin.rs
// ============================================================================
// Module: Builtin Tools
// Description: Upstream-backed tools registered during fast startup.
// Purpose: Serve useful tools before the analysis backend is ready.
// Dependencies: serde_json, sonar-mcp-config
// ============================================================================

//! ## Overview
//! These tools only need the upstream Web API, so they are registered in the
//! first startup phase. Each one is a thin adapter: validate arguments, call
//! one endpoint with the caller's context, and return the upstream payload.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde_json::json;
use sonar_mcp_config::ToolCategory;

use crate::schema::ObjectSchema;
use crate::schema::open_object;
use crate::tools::Tool;
use crate::tools::ToolCall;
use crate::tools::ToolDefinition;
use crate::tools::ToolError;
use crate::upstream::UpstreamClient;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Issue transitions accepted by `change_sonar_issue_status`.
const ISSUE_TRANSITIONS: &[&str] = &["accept", "falsepositive", "reopen"];

// ============================================================================
// SECTION: Registration
// ============================================================================

/// Builds every upstream-backed builtin tool.
#[must_use]
pub fn builtin_tools(upstream: &Arc<UpstreamClient>) -> Vec<Tool> {
    vec![
        system_status_tool(Arc::clone(upstream)),
        search_projects_tool(Arc::clone(upstream)),
        list_languages_tool(Arc::clone(upstream)),
        change_issue_status_tool(Arc::clone(upstream)),
    ]
}

// ============================================================================
// SECTION: Tools
// ============================================================================

/// `get_system_status`: upstream health and version.
fn system_status_tool(upstream: Arc<UpstreamClient>) -> Tool {
    let definition = ToolDefinition::new(
        "get_system_status",
        ToolCategory::System,
        "Get the health status, version, and id of the SonarQube server.",
    )
    .title("Get System Status")
    .read_only()
    .output_schema(open_object("Server status payload."));
    Tool::new(definition, move |call: ToolCall| {
        let upstream = Arc::clone(&upstream);
        async move { upstream.get_json(&call.context, "api/system/status", &[]).await }
    })
}

/// `search_my_sonarqube_projects`: projects visible to the caller.
fn search_projects_tool(upstream: Arc<UpstreamClient>) -> Tool {
    let definition = ToolDefinition::new(
        "search_my_sonarqube_projects",
        ToolCategory::Projects,
        "Find SonarQube projects visible to the current credential.",
    )
    .title("Search My SonarQube Projects")
    .read_only()
    .input_schema(
        ObjectSchema::new()
            .optional_string("q", "Filter on project name or key.")
            .optional_integer("page", "Result page, starting at 1.", 1)
            .build(),
    )
    .output_schema(open_object("Paged project list."));
    Tool::new(definition, move |call: ToolCall| {
        let upstream = Arc::clone(&upstream);
        async move {
            let mut params = Vec::new();
            if let Some(query) = call.optional_str("q")? {
                params.push(("filter", format!("query = \"{}\"", query.replace('"', ""))));
            }
            if let Some(page) = call.optional_u64("page")? {
                params.push(("p", page.max(1).to_string()));
            }
            upstream.get_json(&call.context, "api/components/search_projects", &params).await
        }
    })
}

/// `list_languages`: languages supported by the upstream server.
fn list_languages_tool(upstream: Arc<UpstreamClient>) -> Tool {
    let definition = ToolDefinition::new(
        "list_languages",
        ToolCategory::Languages,
        "List programming languages supported by the SonarQube server.",
    )
    .title("List Languages")
    .read_only()
    .input_schema(
        ObjectSchema::new().optional_string("q", "Filter on language key or name.").build(),
    )
    .output_schema(open_object("Language list."));
    Tool::new(definition, move |call: ToolCall| {
        let upstream = Arc::clone(&upstream);
        async move {
            let params: Vec<(&str, String)> =
                call.optional_str("q")?.map(|query| ("q", query.to_string())).into_iter().collect();
            upstream.get_json(&call.context, "api/languages/list", &params).await
        }
    })
}

/// `change_sonar_issue_status`: applies a workflow transition to an issue.
fn change_issue_status_tool(upstream: Arc<UpstreamClient>) -> Tool {
    let definition = ToolDefinition::new(
        "change_sonar_issue_status",
        ToolCategory::Issues,
        "Change the status of a SonarQube issue: accept, mark as false positive, or reopen.",
    )
    .title("Change Issue Status")
    .input_schema(
        ObjectSchema::new()
            .required_string("key", "Issue key.")
            .required_enum("status", "Transition to apply.", ISSUE_TRANSITIONS)
            .build(),
    );
    Tool::new(definition, move |call: ToolCall| {
        let upstream = Arc::clone(&upstream);
        async move {
            let key = call.required_str("key")?.to_string();
            let transition = parse_transition(call.required_str("status")?)?;
            let key_echo = key.clone();
            upstream
                .post(
                    &call.context,
                    "api/issues/do_transition",
                    &[("issue", key), ("transition", transition.to_string())],
                )
                .await
                .map(|_| json!({"issue": key_echo, "transition": transition, "changed": true}))
        }
    })
}

/// Normalizes and checks an issue transition.
fn parse_transition(raw: &str) -> Result<&'static str, ToolError> {
    let normalized = raw.trim().to_ascii_lowercase().replace(['_', ' '], "");
    ISSUE_TRANSITIONS.iter().copied().find(|transition| *transition == normalized).ok_or_else(|| {
        ToolError::InvalidArguments(format!(
            "status must be one of {}: got {raw}",
            ISSUE_TRANSITIONS.join(", ")
        ))
    })
}
