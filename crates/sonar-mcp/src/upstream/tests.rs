// crates/sonar-mcp/src/upstream/tests.rs
// ============================================================================
// Module: Upstream API Client Unit Tests
// Description: Unit tests for URL building and response classification.
// Purpose: Validate the status-to-taxonomy mapping.
// Dependencies: sonar-mcp
// ============================================================================

//! ## Overview
//! Exercises endpoint construction and upstream response classification
//! without network access.

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

use axum::Router;
use axum::routing::get;
use serde_json::json;
use sonar_mcp_config::UpstreamConfig;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

use super::MAX_RESPONSE_BYTES;
use super::UpstreamClient;
use super::classify_response;
use crate::context::Credential;
use crate::context::TransportContext;
use crate::tools::ToolError;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

fn client(url: &str) -> UpstreamClient {
    let config = UpstreamConfig {
        url: url.to_string(),
        ..UpstreamConfig::default()
    };
    UpstreamClient::new(&config).unwrap()
}

/// Serves `router` on an ephemeral loopback port and returns its base URL.
async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{addr}")
}

/// Answers one request with a chunked body of `chunks` chunks of `size` bytes
/// and no `Content-Length`.
async fn serve_chunked(chunks: usize, size: usize) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buffer = [0_u8; 1024];
        while !request.windows(4).any(|window| window == b"\r\n\r\n") {
            let read = socket.read(&mut buffer).await.unwrap();
            if read == 0 {
                return;
            }
            request.extend_from_slice(&buffer[.. read]);
        }
        let head = "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ntransfer-encoding: chunked\r\n\r\n";
        if socket.write_all(head.as_bytes()).await.is_err() {
            return;
        }
        let chunk = vec![b' '; size];
        for _ in 0 .. chunks {
            let framed = [format!("{size:x}\r\n").as_bytes(), chunk.as_slice(), b"\r\n".as_slice()].concat();
            if socket.write_all(&framed).await.is_err() {
                return;
            }
        }
        let _ = socket.write_all(b"0\r\n\r\n").await;
    });
    format!("http://{addr}")
}

// ============================================================================
// SECTION: Endpoints
// ============================================================================

#[test]
fn endpoint_appends_params_and_organization() {
    let client = client("https://sonarcloud.io");
    let context = TransportContext::new(Credential::new("t"), Some("acme".to_string()));
    let url = client.endpoint(&context, "api/projects/search", &[("q", "my app".to_string())]).unwrap();
    assert_eq!(url.as_str(), "https://sonarcloud.io/api/projects/search?q=my+app&organization=acme");
}

#[test]
fn endpoint_respects_base_path_and_omits_empty_query() {
    let client = client("https://sonar.example.com/sonar");
    assert_eq!(client.base_url().as_str(), "https://sonar.example.com/sonar/");
    let context = TransportContext::new(Credential::new("t"), None);
    let url = client.endpoint(&context, "/api/system/status", &[]).unwrap();
    assert_eq!(url.as_str(), "https://sonar.example.com/sonar/api/system/status");
}

#[tokio::test]
async fn closed_client_reports_unavailable() {
    let client = client("https://sonarcloud.io");
    assert!(client.close());
    assert!(!client.close());
    let context = TransportContext::new(Credential::new("t"), None);
    let result = client.get_json(&context, "api/system/status", &[]).await;
    assert!(matches!(result, Err(ToolError::Unavailable(_))));
}

// ============================================================================
// SECTION: Response Size
// ============================================================================

#[tokio::test]
async fn body_within_limit_is_decoded() {
    let base = serve(Router::new().route("/api/system/status", get(|| async { r#"{"status":"UP"}"# }))).await;
    let context = TransportContext::new(Credential::new("t"), None);
    let value = client(&base).get_json(&context, "api/system/status", &[]).await.unwrap();
    assert_eq!(value, json!({"status": "UP"}));
}

#[tokio::test]
async fn declared_oversized_body_is_rejected() {
    let router = Router::new()
        .route("/api/issues/search", get(|| async { vec![b' '; MAX_RESPONSE_BYTES + 1] }));
    let base = serve(router).await;
    let context = TransportContext::new(Credential::new("t"), None);
    let result = client(&base).get_json(&context, "api/issues/search", &[]).await;
    assert_eq!(result, Err(ToolError::Protocol("upstream response exceeds size limit".to_string())));
}

#[tokio::test]
async fn streamed_oversized_body_is_rejected() {
    let base = serve_chunked(9, 1024 * 1024).await;
    let context = TransportContext::new(Credential::new("t"), None);
    let result = client(&base).get_json(&context, "api/issues/search", &[]).await;
    assert_eq!(result, Err(ToolError::Protocol("upstream response exceeds size limit".to_string())));
}

// ============================================================================
// SECTION: Classification
// ============================================================================

#[test]
fn success_bodies_decode() {
    assert_eq!(classify_response(200, br#"{"status":"UP"}"#).unwrap(), json!({"status": "UP"}));
    assert_eq!(classify_response(204, b"").unwrap(), json!({}));
    assert!(matches!(classify_response(200, b"<html>"), Err(ToolError::Protocol(_))));
}

#[test]
fn auth_statuses_map_to_taxonomy() {
    assert!(matches!(classify_response(401, b""), Err(ToolError::Unauthorized(_))));
    assert!(matches!(classify_response(403, b""), Err(ToolError::Forbidden(_))));
    assert!(matches!(classify_response(404, b""), Err(ToolError::NotFound(_))));
}

#[test]
fn upstream_error_messages_surface_verbatim() {
    let body = br#"{"errors":[{"msg":"Issue key 'X' not found"},{"msg":"second"}]}"#;
    assert_eq!(
        classify_response(400, body),
        Err(ToolError::Protocol("Issue key 'X' not found; second".to_string()))
    );
    assert_eq!(
        classify_response(404, body),
        Err(ToolError::NotFound("Issue key 'X' not found; second".to_string()))
    );
}

#[test]
fn unknown_failures_are_internal() {
    assert_eq!(
        classify_response(502, b"bad gateway"),
        Err(ToolError::Internal("upstream returned HTTP 502".to_string()))
    );
}
