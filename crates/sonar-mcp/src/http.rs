// crates/sonar-mcp/src/http.rs
// ============================================================================
// Module: HTTP Transport
// Description: Stateless multi-tenant JSON-RPC endpoint over HTTP or HTTPS.
// Purpose: Serve remote clients with per-request authentication.
// Dependencies: axum, axum-server, tokio, tracing
// ============================================================================

//! ## Overview
//! One endpoint, `/mcp`, accepting `POST` and `OPTIONS`. Every `POST` runs
//! the same chain: origin check, body limit, authentication, protocol
//! version check, JSON-RPC parse, dispatch. Each request carries its own
//! credential, so no state survives between requests apart from optional
//! session bindings.
//!
//! The listener is served by `axum-server`, plain or with rustls, and stops
//! gracefully through its handle.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::Method;
use axum::http::StatusCode;
use axum::http::header::ACCESS_CONTROL_ALLOW_ORIGIN;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::post;
use axum_server::tls_rustls::RustlsConfig;
use sonar_mcp_config::ServerConfig;
use sonar_mcp_config::ServerTlsConfig;
use sonar_mcp_config::validate_port;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::auth::AuthOutcome;
use crate::auth::AuthenticationFilter;
use crate::auth::header_names;
use crate::dispatch::McpDispatcher;
use crate::dispatch::is_supported_protocol_version;
use crate::lifecycle::ServerError;
use crate::rpc::error_body;
use crate::rpc::error_codes;
use crate::rpc::parse_request;
use crate::security::OriginDecision;
use crate::security::SecurityFilter;
use crate::security::origin_rejected_response;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Path of the MCP endpoint.
pub const MCP_PATH: &str = "/mcp";

// ============================================================================
// SECTION: Transport
// ============================================================================

/// Shared handler state.
struct HttpState {
    /// Origin policy.
    security: SecurityFilter,
    /// Credential and metadata checks.
    auth: AuthenticationFilter,
    /// JSON-RPC router.
    dispatcher: McpDispatcher,
    /// Maximum accepted request body size.
    max_body_bytes: usize,
}

/// Handles for a running listener.
struct RunningServer {
    /// Requests a graceful shutdown with the given grace period.
    stop: oneshot::Sender<Duration>,
    /// Server task.
    task: JoinHandle<std::io::Result<()>>,
}

/// HTTP(S) transport.
pub struct HttpTransport {
    /// Resolved bind address.
    bind: SocketAddr,
    /// TLS material, when serving HTTPS.
    tls: Option<ServerTlsConfig>,
    /// Handler state.
    state: Arc<HttpState>,
    /// Listener handles once started.
    running: Mutex<Option<RunningServer>>,
    /// Bound address once started.
    local_addr: Mutex<Option<SocketAddr>>,
    /// Flips to true once the server task has exited.
    stopped: Arc<watch::Sender<bool>>,
}

impl HttpTransport {
    /// Builds the transport without binding.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] for an out-of-range port or an
    /// unresolvable host.
    pub fn new(
        config: &ServerConfig,
        dispatcher: McpDispatcher,
        auth: AuthenticationFilter,
    ) -> Result<Self, ServerError> {
        let port = validate_port(config.http.port).map_err(|err| ServerError::Config(err.to_string()))?;
        let ip = resolve_bind_host(&config.http.host)?;
        if ip.is_unspecified() {
            tracing::warn!(
                host = %config.http.host,
                "HTTP transport is listening on all interfaces; any reachable client can connect"
            );
        }
        if config.http.tls.is_none() {
            tracing::warn!("HTTP transport is running without TLS; credentials travel in clear text");
        }
        Ok(Self {
            bind: SocketAddr::new(ip, port),
            tls: config.http.tls.clone(),
            state: Arc::new(HttpState {
                security: SecurityFilter::for_bind_host(&config.http.host),
                auth,
                dispatcher,
                max_body_bytes: config.max_body_bytes,
            }),
            running: Mutex::new(None),
            local_addr: Mutex::new(None),
            stopped: Arc::new(watch::channel(false).0),
        })
    }

    /// Returns the configured bind address.
    #[must_use]
    pub const fn bind_addr(&self) -> SocketAddr {
        self.bind
    }

    /// Returns the bound address once listening.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Builds the axum router for this transport.
    #[must_use]
    pub fn router(&self) -> Router {
        Router::new()
            .route(MCP_PATH, post(handle_post).options(handle_options))
            .with_state(Arc::clone(&self.state))
    }

    /// Binds the listener and starts serving in a background task.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Transport`] when TLS material cannot be loaded,
    /// the address cannot be bound, or the transport is already running.
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        if self.running.lock().unwrap_or_else(PoisonError::into_inner).is_some() {
            return Err(ServerError::Transport("HTTP transport already started".to_string()));
        }
        let handle = axum_server::Handle::new();
        let server_handle = handle.clone();
        let service = self.router().into_make_service();
        let bind = self.bind;
        let stopped = Arc::clone(&self.stopped);
        let mut task = match &self.tls {
            Some(tls) => {
                let rustls = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
                    .await
                    .map_err(|err| ServerError::Transport(format!("failed to load TLS material: {err}")))?;
                tokio::spawn(async move {
                    let result =
                        axum_server::bind_rustls(bind, rustls).handle(server_handle).serve(service).await;
                    stopped.send_replace(true);
                    result
                })
            }
            None => tokio::spawn(async move {
                let result = axum_server::bind(bind).handle(server_handle).serve(service).await;
                stopped.send_replace(true);
                result
            }),
        };

        let Some(local_addr) = handle.listening().await else {
            let reason = match (&mut task).await {
                Ok(Err(err)) => err.to_string(),
                Ok(Ok(())) => "listener exited before binding".to_string(),
                Err(err) => err.to_string(),
            };
            return Err(ServerError::Transport(format!("failed to bind {bind}: {reason}")));
        };

        let (stop, stop_rx) = oneshot::channel::<Duration>();
        tokio::spawn(async move {
            match stop_rx.await {
                Ok(grace) => handle.graceful_shutdown(Some(grace)),
                Err(_) => handle.shutdown(),
            }
        });
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = Some(local_addr);
        *self.running.lock().unwrap_or_else(PoisonError::into_inner) = Some(RunningServer {
            stop,
            task,
        });
        tracing::info!(
            addr = %local_addr,
            tls = self.tls.is_some(),
            path = MCP_PATH,
            "HTTP transport listening"
        );
        Ok(local_addr)
    }

    /// Waits until the server task has exited.
    pub async fn wait_stopped(&self) {
        let mut stopped = self.stopped.subscribe();
        let _ = stopped.wait_for(|done| *done).await;
    }

    /// Stops accepting connections and waits for in-flight requests.
    ///
    /// Waits at most `grace` plus one second before aborting the server task.
    /// Calling this on a transport that is not running is a no-op.
    pub async fn stop(&self, grace: Duration) {
        let running = self.running.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(RunningServer {
            stop,
            mut task,
        }) = running
        else {
            return;
        };
        let _ = stop.send(grace);
        match tokio::time::timeout(grace + Duration::from_secs(1), &mut task).await {
            Ok(Ok(Ok(()))) => tracing::info!("HTTP transport stopped"),
            Ok(Ok(Err(err))) => tracing::warn!(error = %err, "HTTP transport exited with an error"),
            Ok(Err(err)) => tracing::warn!(error = %err, "HTTP transport task failed"),
            Err(_) => {
                tracing::warn!("HTTP transport did not stop in time; aborting");
                task.abort();
                self.stopped.send_replace(true);
            }
        }
    }
}

// ============================================================================
// SECTION: Handlers
// ============================================================================

/// Answers CORS preflight requests.
async fn handle_options(State(state): State<Arc<HttpState>>, headers: HeaderMap) -> Response {
    state.security.preflight_response(&headers)
}

/// Runs the filter chain and dispatches one JSON-RPC message.
async fn handle_post(
    State(state): State<Arc<HttpState>>,
    method: Method,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let decision = state.security.evaluate(&headers);
    if decision == OriginDecision::Rejected {
        return origin_rejected_response();
    }
    let mut response = process(&state, &method, &headers, body).await;
    if let Some(origin) = decision.allow_origin() {
        response.headers_mut().insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
    }
    response
}

/// Filter chain after the origin check.
async fn process(state: &HttpState, method: &Method, headers: &HeaderMap, body: Body) -> Response {
    let Ok(bytes) = axum::body::to_bytes(body, state.max_body_bytes).await else {
        return rpc_error(
            StatusCode::PAYLOAD_TOO_LARGE,
            error_codes::INVALID_REQUEST,
            "Request body too large",
        );
    };
    let context = match state.auth.authenticate(method, headers) {
        Ok(AuthOutcome::Authenticated(context)) => context,
        Ok(AuthOutcome::Preflight) => return state.security.preflight_response(headers),
        Err(rejection) => return rejection.into_response(),
    };
    if let Some(version) = headers.get(header_names::PROTOCOL_VERSION) {
        let supported = version.to_str().is_ok_and(|version| is_supported_protocol_version(version.trim()));
        if !supported {
            return rpc_error(
                StatusCode::BAD_REQUEST,
                error_codes::INVALID_REQUEST,
                "Unsupported MCP-Protocol-Version",
            );
        }
    }
    let request = match parse_request(&bytes) {
        Ok(request) => request,
        Err(response) => return (StatusCode::BAD_REQUEST, Json(*response)).into_response(),
    };
    match state.dispatcher.dispatch(request, &context).await {
        Some(response) => (StatusCode::OK, Json(response)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// Builds a JSON-RPC error response with a null id.
fn rpc_error(status: StatusCode, code: i64, message: &str) -> Response {
    (status, Json(error_body(code, message))).into_response()
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the configured host to an IP address.
fn resolve_bind_host(host: &str) -> Result<IpAddr, ServerError> {
    let trimmed = host.trim();
    if trimmed.eq_ignore_ascii_case("localhost") {
        return Ok(IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
    let unbracketed = trimmed.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')).unwrap_or(trimmed);
    unbracketed
        .parse::<IpAddr>()
        .map_err(|_| ServerError::Config(format!("invalid HTTP bind host: {host}")))
}
