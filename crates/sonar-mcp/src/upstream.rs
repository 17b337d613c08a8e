// crates/sonar-mcp/src/upstream.rs
// ============================================================================
// Module: Upstream API Client
// Description: Credential-scoped HTTP access to the SonarQube Web API.
// Purpose: Issue upstream calls on behalf of the current transport context.
// Dependencies: reqwest, serde_json, url
// ============================================================================

//! ## Overview
//! The [`UpstreamClient`] holds one pooled HTTP client for the process. Each
//! call is scoped to the caller's [`TransportContext`]: the credential is
//! sent as a bearer token and the organization, when present, is added as a
//! query parameter. Upstream failures are classified into [`ToolError`] here
//! so tools never see transport details.
//!
//! Security posture: upstream bodies are untrusted; error text is extracted
//! from the documented `errors[].msg` shape only.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::PoisonError;
use std::sync::RwLock;
use std::time::Duration;

use reqwest::Client;
use reqwest::RequestBuilder;
use reqwest::Response;
use reqwest::header::ACCEPT;
use serde_json::Value;
use serde_json::json;
use sonar_mcp_config::UpstreamConfig;
use thiserror::Error;
use url::Url;

use crate::context::TransportContext;
use crate::tools::ToolError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum accepted upstream response size in bytes.
const MAX_RESPONSE_BYTES: usize = 8 * 1024 * 1024;
/// User agent sent upstream.
const USER_AGENT: &str = concat!("sonar-mcp/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Upstream client construction errors.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The configured base URL is unusable.
    #[error("invalid upstream url: {0}")]
    InvalidUrl(String),
    /// The HTTP client could not be built.
    #[error("upstream client error: {0}")]
    Client(String),
}

// ============================================================================
// SECTION: Client
// ============================================================================

/// Pooled, credential-scoped upstream API client.
#[derive(Debug)]
pub struct UpstreamClient {
    /// Base URL with a trailing slash.
    base_url: Url,
    /// Pooled client; `None` once closed.
    client: RwLock<Option<Client>>,
}

impl UpstreamClient {
    /// Builds the client from upstream configuration.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError`] when the URL or HTTP client is invalid.
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let mut base_url = Url::parse(config.url.trim())
            .map_err(|err| UpstreamError::InvalidUrl(err.to_string()))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|err| UpstreamError::Client(err.to_string()))?;
        Ok(Self {
            base_url,
            client: RwLock::new(Some(client)),
        })
    }

    /// Returns the base URL.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Issues a GET request and decodes the JSON response.
    ///
    /// # Errors
    ///
    /// Returns a classified [`ToolError`] on any failure.
    pub async fn get_json(
        &self,
        context: &TransportContext,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Value, ToolError> {
        let url = self.endpoint(context, path, params)?;
        let request = self.client()?.get(url);
        self.send(context, request).await
    }

    /// Issues a POST request with parameters in the query string.
    ///
    /// # Errors
    ///
    /// Returns a classified [`ToolError`] on any failure.
    pub async fn post(
        &self,
        context: &TransportContext,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Value, ToolError> {
        let url = self.endpoint(context, path, params)?;
        let request = self.client()?.post(url);
        self.send(context, request).await
    }

    /// Releases the pooled HTTP client. Later calls fail as unavailable.
    pub fn close(&self) -> bool {
        self.client.write().unwrap_or_else(PoisonError::into_inner).take().is_some()
    }

    /// Returns a handle to the pooled client.
    fn client(&self) -> Result<Client, ToolError> {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| ToolError::Unavailable("upstream client is closed".to_string()))
    }

    /// Builds the endpoint URL with query parameters and organization.
    fn endpoint(
        &self,
        context: &TransportContext,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Url, ToolError> {
        let mut url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|err| ToolError::Internal(format!("invalid upstream path {path}: {err}")))?;
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in params {
                query.append_pair(key, value);
            }
            if let Some(organization) = &context.organization {
                query.append_pair("organization", organization);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        Ok(url)
    }

    /// Sends a request with the caller's credential and classifies the reply.
    async fn send(
        &self,
        context: &TransportContext,
        request: RequestBuilder,
    ) -> Result<Value, ToolError> {
        let response = request
            .bearer_auth(context.credential.as_str())
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|err| ToolError::Unavailable(format!("upstream request failed: {err}")))?;
        let status = response.status().as_u16();
        let body = read_limited(response, MAX_RESPONSE_BYTES).await?;
        classify_response(status, &body)
    }
}

/// Reads a response body, failing as soon as it exceeds `limit` bytes.
///
/// A declared `Content-Length` over the limit is rejected before any read.
async fn read_limited(mut response: Response, limit: usize) -> Result<Vec<u8>, ToolError> {
    let too_large = || ToolError::Protocol("upstream response exceeds size limit".to_string());
    if let Some(length) = response.content_length()
        && !usize::try_from(length).is_ok_and(|length| length <= limit)
    {
        return Err(too_large());
    }
    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|err| ToolError::Unavailable(format!("upstream response failed: {err}")))?
    {
        if body.len() + chunk.len() > limit {
            return Err(too_large());
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

// ============================================================================
// SECTION: Classification
// ============================================================================

/// Maps an upstream status and body onto a value or a classified error.
pub(crate) fn classify_response(status: u16, body: &[u8]) -> Result<Value, ToolError> {
    if (200 .. 300).contains(&status) {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(json!({}));
        }
        return serde_json::from_slice(body)
            .map_err(|err| ToolError::Protocol(format!("malformed upstream response: {err}")));
    }
    let upstream_message = error_messages(body);
    let message = upstream_message.clone().unwrap_or_else(|| format!("upstream returned HTTP {status}"));
    match status {
        401 => Err(ToolError::Unauthorized(message)),
        403 => Err(ToolError::Forbidden(message)),
        404 => Err(ToolError::NotFound(message)),
        _ => match upstream_message {
            Some(message) => Err(ToolError::Protocol(message)),
            None => Err(ToolError::Internal(message)),
        },
    }
}

/// Extracts `errors[].msg` from an upstream error body.
fn error_messages(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    let messages: Vec<&str> = value
        .get("errors")?
        .as_array()?
        .iter()
        .filter_map(|error| error.get("msg").and_then(Value::as_str))
        .collect();
    (!messages.is_empty()).then(|| messages.join("; "))
}

#[cfg(test)]
mod tests;
