// crates/sonar-mcp/tests/http_transport.rs
// ============================================================================
// Module: HTTP Transport Tests
// Description: End-to-end tests of the HTTP filter chain and dispatch.
// Purpose: Validate origin, authentication, override, and framing behavior.
// Dependencies: sonar-mcp, axum, tower, reqwest
// ============================================================================

//! ## Overview
//! Drives the `/mcp` router in-process with `tower::ServiceExt::oneshot` and
//! checks one real listener with an HTTP client.
//!
//! Security posture: every request here is untrusted input; rejections must
//! happen before dispatch and never leak which tools exist.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions are permitted."
)]

mod common;

use std::time::Duration;

use axum::body::Body;
use axum::http::Method;
use axum::http::StatusCode;
use serde_json::Value;
use serde_json::json;

use crate::common::call_tool_body;
use crate::common::free_port;
use crate::common::http_config;
use crate::common::lifecycle;
use crate::common::list_tools_body;
use crate::common::raw_request;
use crate::common::rpc_request;
use crate::common::send;
use crate::common::tool_names;

// ============================================================================
// SECTION: Helpers
// ============================================================================

const TOKEN: (&str, &str) = ("sonarqube_token", "squ_tenant_a");

fn router() -> axum::Router {
    lifecycle(http_config(8080), None).http_transport().unwrap().router()
}

fn cloud_router(organization: Option<&str>) -> axum::Router {
    let mut config = http_config(8080);
    config.upstream.url = "https://sonarcloud.io".to_string();
    config.upstream.organization = organization.map(str::to_string);
    lifecycle(config, None).http_transport().unwrap().router()
}

// ============================================================================
// SECTION: Authentication
// ============================================================================

#[tokio::test]
async fn missing_token_is_challenged() {
    let response = send(&router(), rpc_request(&[], &list_tools_body())).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers.get("www-authenticate").unwrap().to_str().unwrap(),
        "Bearer realm=\"MCP Server\""
    );
    assert_eq!(response.body["error"]["code"], -32_000);
    assert_eq!(response.body["id"], Value::Null);
}

#[tokio::test]
async fn token_header_lists_all_tools() {
    let response = send(&router(), rpc_request(&[TOKEN], &list_tools_body())).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        tool_names(&response.body),
        vec![
            "change_sonar_issue_status",
            "describe_request",
            "get_system_status",
            "list_languages",
            "search_my_sonarqube_projects",
        ]
    );
}

#[tokio::test]
async fn bearer_authorization_is_accepted() {
    let response = send(
        &router(),
        rpc_request(&[("authorization", "Bearer squ_tenant_b")], &list_tools_body()),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(!tool_names(&response.body).is_empty());
}

#[tokio::test]
async fn session_rebinding_with_another_token_is_forbidden() {
    let router = router();
    let first = send(
        &router,
        rpc_request(&[TOKEN, ("mcp-session-id", "session-1")], &list_tools_body()),
    )
    .await;
    assert_eq!(first.status, StatusCode::OK);
    let second = send(
        &router,
        rpc_request(
            &[("sonarqube_token", "squ_tenant_b"), ("mcp-session-id", "session-1")],
            &list_tools_body(),
        ),
    )
    .await;
    assert_eq!(second.status, StatusCode::FORBIDDEN);
    assert_eq!(second.body["error"]["message"], "Session credential mismatch");
}

#[tokio::test]
async fn cloud_requires_organization_header() {
    let router = cloud_router(None);
    let missing = send(&router, rpc_request(&[TOKEN], &list_tools_body())).await;
    assert_eq!(missing.status, StatusCode::BAD_REQUEST);

    let response = send(
        &router,
        rpc_request(&[TOKEN, ("sonarqube_org", "acme")], &call_tool_body("describe_request", &json!({}))),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["result"]["structuredContent"]["organization"], "acme");
}

#[tokio::test]
async fn cloud_rejects_conflicting_organization() {
    let router = cloud_router(Some("acme"));
    let response =
        send(&router, rpc_request(&[TOKEN, ("sonarqube_org", "other")], &list_tools_body())).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    let accepted = send(&router, rpc_request(&[TOKEN], &list_tools_body())).await;
    assert_eq!(accepted.status, StatusCode::OK);
}

// ============================================================================
// SECTION: Origin Policy
// ============================================================================

#[tokio::test]
async fn loopback_origin_is_echoed() {
    let response = send(
        &router(),
        rpc_request(&[TOKEN, ("origin", "http://localhost:3000")], &list_tools_body()),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.headers.get("access-control-allow-origin").unwrap(),
        "http://localhost:3000"
    );
}

#[tokio::test]
async fn lookalike_origins_are_rejected() {
    for origin in ["http://localhost.evil.com", "http://127.0.0.1.evil.com", "null"] {
        let response =
            send(&router(), rpc_request(&[TOKEN, ("origin", origin)], &list_tools_body())).await;
        assert_eq!(response.status, StatusCode::FORBIDDEN, "origin {origin}");
        assert_eq!(response.body["error"]["message"], "Origin not allowed");
    }
}

#[tokio::test]
async fn preflight_answers_without_credentials() {
    let response = send(
        &router(),
        raw_request(Method::OPTIONS, &[("origin", "http://127.0.0.1:5173")], Body::empty()),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.headers.get("access-control-allow-methods").unwrap(), "POST, OPTIONS");
    let allowed = response.headers.get("access-control-allow-headers").unwrap().to_str().unwrap();
    assert!(allowed.contains("SONARQUBE_TOKEN"));
}

#[tokio::test]
async fn other_methods_are_not_routed() {
    let response = send(&router(), raw_request(Method::GET, &[TOKEN], Body::empty())).await;
    assert_eq!(response.status, StatusCode::METHOD_NOT_ALLOWED);
}

// ============================================================================
// SECTION: Per-Request Overrides
// ============================================================================

#[tokio::test]
async fn toolset_override_narrows_listing() {
    let response = send(
        &router(),
        rpc_request(&[TOKEN, ("sonarqube_toolsets", "issues")], &list_tools_body()),
    )
    .await;
    assert_eq!(
        tool_names(&response.body),
        vec!["change_sonar_issue_status", "describe_request", "search_my_sonarqube_projects"]
    );
}

#[tokio::test]
async fn toolset_override_reaches_the_tool_context() {
    let response = send(
        &router(),
        rpc_request(
            &[TOKEN, ("sonarqube_toolsets", "rules, issues")],
            &call_tool_body("describe_request", &json!({})),
        ),
    )
    .await;
    assert_eq!(response.body["result"]["structuredContent"]["toolsets"], json!(["issues", "rules"]));
}

#[tokio::test]
async fn unknown_toolset_override_is_bad_request() {
    let response = send(
        &router(),
        rpc_request(&[TOKEN, ("sonarqube_toolsets", "issues,quantum")], &list_tools_body()),
    )
    .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn read_only_override_hides_and_blocks_mutating_tools() {
    let router = router();
    let headers = [TOKEN, ("sonarqube_read_only", "true")];
    let listed = send(&router, rpc_request(&headers, &list_tools_body())).await;
    assert!(!tool_names(&listed.body).contains(&"change_sonar_issue_status".to_string()));

    let called = send(
        &router,
        rpc_request(
            &headers,
            &call_tool_body("change_sonar_issue_status", &json!({"key": "AX-1", "status": "accept"})),
        ),
    )
    .await;
    assert_eq!(called.status, StatusCode::OK);
    assert_eq!(called.body["error"]["code"], -32_602);
    assert_eq!(called.body["error"]["message"], "Unknown tool: change_sonar_issue_status");
}

#[tokio::test]
async fn overrides_do_not_leak_between_requests() {
    let router = router();
    let narrowed =
        send(&router, rpc_request(&[TOKEN, ("sonarqube_toolsets", "system")], &list_tools_body())).await;
    assert_eq!(tool_names(&narrowed.body).len(), 2);
    let full = send(&router, rpc_request(&[TOKEN], &list_tools_body())).await;
    assert_eq!(tool_names(&full.body).len(), 5);
}

// ============================================================================
// SECTION: Framing
// ============================================================================

#[tokio::test]
async fn notifications_are_accepted_without_body() {
    let response = send(
        &router(),
        rpc_request(&[TOKEN], &json!({"jsonrpc": "2.0", "method": "notifications/initialized"})),
    )
    .await;
    assert_eq!(response.status, StatusCode::ACCEPTED);
    assert_eq!(response.body, Value::Null);
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let body = Body::from("x".repeat(5 * 1024));
    let response = send(&router(), raw_request(Method::POST, &[TOKEN], body)).await;
    assert_eq!(response.status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn malformed_json_is_parse_error() {
    let response =
        send(&router(), raw_request(Method::POST, &[TOKEN], Body::from("{not json"))).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["error"]["code"], -32_700);
    assert_eq!(response.body["id"], Value::Null);
}

#[tokio::test]
async fn unsupported_protocol_version_is_rejected() {
    let response = send(
        &router(),
        rpc_request(&[TOKEN, ("mcp-protocol-version", "1999-01-01")], &list_tools_body()),
    )
    .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["error"]["code"], -32_600);
    let supported = send(
        &router(),
        rpc_request(&[TOKEN, ("mcp-protocol-version", "2025-06-18")], &list_tools_body()),
    )
    .await;
    assert_eq!(supported.status, StatusCode::OK);
}

// ============================================================================
// SECTION: Listener
// ============================================================================

#[tokio::test]
async fn listener_serves_and_stops() {
    let server = lifecycle(http_config(u32::from(free_port())), None);
    let addr = server.start_http().await.unwrap();
    assert_eq!(server.local_addr(), Some(addr));

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{addr}/mcp"))
        .header("content-type", "application/json")
        .header(TOKEN.0, TOKEN.1)
        .body(list_tools_body().to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = serde_json::from_slice(&response.bytes().await.unwrap()).unwrap();
    assert_eq!(tool_names(&body).len(), 5);

    server.shutdown().await;
    tokio::time::timeout(Duration::from_secs(5), server.wait()).await.unwrap();
    assert!(server.local_addr().is_none());
}
