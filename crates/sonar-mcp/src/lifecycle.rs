// crates/sonar-mcp/src/lifecycle.rs
// ============================================================================
// Module: Server Lifecycle
// Description: Two-phase startup and ordered shutdown of the MCP server.
// Purpose: Serve builtin tools immediately and add backend tools later.
// Dependencies: tokio, thiserror, tracing
// ============================================================================

//! ## Overview
//! [`ServerLifecycle`] owns every shared component. Startup has two phases:
//!
//! 1. Fast path: build the session store, upstream client, registry,
//!    executor, and dispatcher; register builtin tools; start the transport.
//! 2. Background: initialize the analysis backend, register its tools, and
//!    notify connected clients that the tool list changed.
//!
//! A Phase 2 failure is logged and leaves the Phase 1 tools in service.
//! [`ServerLifecycle::shutdown`] is idempotent and tears components down in
//! a fixed order, logging and skipping past any step that fails.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use sonar_mcp_config::ServerTransport;
use sonar_mcp_config::SonarMcpConfig;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::sync::broadcast;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::task::JoinHandle;

use crate::audit::AuthAuditSink;
use crate::audit::TracingAuthAuditSink;
use crate::auth::AuthenticationFilter;
use crate::auth::OrganizationPolicy;
use crate::backend::AnalysisBackend;
use crate::backend::AnalyzerSet;
use crate::backend::backend_tools;
use crate::builtin::builtin_tools;
use crate::context::Credential;
use crate::context::TransportContext;
use crate::dispatch::McpDispatcher;
use crate::dispatch::ServerInfo;
use crate::executor::ToolExecutor;
use crate::http::HttpTransport;
use crate::rpc::ServerNotification;
use crate::session::SessionTokenStore;
use crate::stdio::StdioSession;
use crate::telemetry::TelemetrySink;
use crate::telemetry::TracingTelemetry;
use crate::tools::Tool;
use crate::tools::ToolFilter;
use crate::tools::ToolRegistry;
use crate::upstream::UpstreamClient;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Buffered server notifications per subscriber.
const NOTIFICATION_CAPACITY: usize = 16;
/// Grace period for in-flight HTTP requests during shutdown.
const HTTP_STOP_GRACE: Duration = Duration::from_secs(5);

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Server lifecycle errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Component construction or startup sequencing failed.
    #[error("init error: {0}")]
    Init(String),
    /// Transport failure.
    #[error("transport error: {0}")]
    Transport(String),
}

// ============================================================================
// SECTION: State
// ============================================================================

/// Progress of the background initialization phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitializationState {
    /// Phase 2 has not begun.
    NotStarted,
    /// Phase 2 is running.
    Running,
    /// Phase 2 finished and backend tools are registered.
    Completed,
    /// Phase 2 failed; only Phase 1 tools are available.
    Failed,
}

impl InitializationState {
    /// Returns true for states Phase 2 never leaves.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns a stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Pluggable collaborators supplied by the embedding binary.
pub struct ServerComponents {
    /// Analysis engine initialized in Phase 2.
    pub backend: Option<Arc<dyn AnalysisBackend>>,
    /// Tool invocation telemetry.
    pub telemetry: Arc<dyn TelemetrySink>,
    /// Authentication decision audit.
    pub auth_audit: Arc<dyn AuthAuditSink>,
    /// Additional tools registered in Phase 1.
    pub extra_tools: Vec<Tool>,
}

impl Default for ServerComponents {
    fn default() -> Self {
        Self {
            backend: None,
            telemetry: Arc::new(TracingTelemetry),
            auth_audit: Arc::new(TracingAuthAuditSink),
            extra_tools: Vec::new(),
        }
    }
}

/// Phase 2 task handles.
struct BackgroundInit {
    /// Awaits the worker and records abnormal exits.
    supervisor: JoinHandle<()>,
    /// Cancels the worker running the backend initialization.
    worker: AbortHandle,
}

/// Transport currently serving clients.
#[derive(Clone)]
enum ActiveTransport {
    /// Single local client.
    Stdio(Arc<StdioSession>),
    /// Remote clients.
    Http(Arc<HttpTransport>),
}

// ============================================================================
// SECTION: Lifecycle
// ============================================================================

/// Owner of the running server.
pub struct ServerLifecycle {
    /// Validated configuration.
    config: SonarMcpConfig,
    /// Session bindings.
    sessions: Arc<SessionTokenStore>,
    /// Upstream Web API client.
    upstream: Arc<UpstreamClient>,
    /// Tool catalog.
    registry: Arc<ToolRegistry>,
    /// JSON-RPC router.
    dispatcher: McpDispatcher,
    /// Analysis engine, if any.
    backend: Option<Arc<dyn AnalysisBackend>>,
    /// Authentication audit sink.
    auth_audit: Arc<dyn AuthAuditSink>,
    /// Phase 2 progress.
    state: Arc<watch::Sender<InitializationState>>,
    /// Server-initiated notifications.
    notifications: broadcast::Sender<ServerNotification>,
    /// Phase 2 tasks. Locked only while holding `transport`.
    background: Mutex<Option<BackgroundInit>>,
    /// Active transport.
    transport: Mutex<Option<ActiveTransport>>,
    /// Set by the first start.
    started: AtomicBool,
    /// Set by the first shutdown.
    shut_down: AtomicBool,
}

impl ServerLifecycle {
    /// Validates configuration and builds every Phase 1 component.
    ///
    /// Builtin and extra tools are registered here so they are listed as soon
    /// as the transport accepts its first request.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] for invalid configuration and
    /// [`ServerError::Init`] when a component cannot be built.
    pub fn new(config: SonarMcpConfig, components: ServerComponents) -> Result<Self, ServerError> {
        config.validate().map_err(|err| ServerError::Config(err.to_string()))?;
        let upstream = Arc::new(
            UpstreamClient::new(&config.upstream).map_err(|err| ServerError::Init(err.to_string()))?,
        );
        let registry = Arc::new(ToolRegistry::new(ToolFilter::from_config(&config.tools)));
        registry
            .register_all(builtin_tools(&upstream))
            .map_err(|err| ServerError::Init(err.to_string()))?;
        registry
            .register_all(components.extra_tools)
            .map_err(|err| ServerError::Init(err.to_string()))?;
        let dispatcher = McpDispatcher::new(
            Arc::clone(&registry),
            ToolExecutor::new(components.telemetry),
            ServerInfo::default(),
        );
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        let (state, _) = watch::channel(InitializationState::NotStarted);
        tracing::info!(
            transport = config.server.transport.as_str(),
            tools = registry.len(),
            upstream = %upstream.base_url(),
            "server components ready"
        );
        Ok(Self {
            config,
            sessions: Arc::new(SessionTokenStore::new()),
            upstream,
            registry,
            dispatcher,
            backend: components.backend,
            auth_audit: components.auth_audit,
            state: Arc::new(state),
            notifications,
            background: Mutex::new(None),
            transport: Mutex::new(None),
            started: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Returns the tool registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Returns the session store.
    #[must_use]
    pub const fn sessions(&self) -> &Arc<SessionTokenStore> {
        &self.sessions
    }

    /// Returns the dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &McpDispatcher {
        &self.dispatcher
    }

    /// Returns the current Phase 2 state.
    #[must_use]
    pub fn state(&self) -> InitializationState {
        *self.state.borrow()
    }

    /// Subscribes to server-initiated notifications.
    #[must_use]
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<ServerNotification> {
        self.notifications.subscribe()
    }

    /// Returns the HTTP listener address once bound.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.transport.lock().unwrap_or_else(PoisonError::into_inner) {
            Some(ActiveTransport::Http(http)) => http.local_addr(),
            Some(ActiveTransport::Stdio(_)) | None => None,
        }
    }

    // ------------------------------------------------------------------------
    // Startup
    // ------------------------------------------------------------------------

    /// Starts the configured transport on the process streams or a socket.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] when the server was already started or the
    /// transport cannot start.
    pub async fn start(&self) -> Result<(), ServerError> {
        match self.config.server.transport {
            ServerTransport::Stdio => {
                self.start_stdio_with(tokio::io::stdin(), tokio::io::stdout()).map(|_| ())
            }
            ServerTransport::Http | ServerTransport::Https => self.start_http().await.map(|_| ()),
        }
    }

    /// Starts a stdio session over the given streams.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] when the server was already started or no
    /// token is configured.
    pub fn start_stdio_with<R, W>(&self, input: R, output: W) -> Result<Arc<StdioSession>, ServerError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let token = self
            .config
            .upstream
            .token
            .clone()
            .ok_or_else(|| ServerError::Config("stdio transport requires a token".to_string()))?;
        self.mark_started()?;
        let context =
            TransportContext::new(Credential::new(token), self.config.upstream.organization.clone());
        let session = StdioSession::start(
            input,
            output,
            self.dispatcher.clone(),
            context,
            self.notifications.subscribe(),
            Duration::from_millis(self.config.lifecycle.stdio_close_grace_ms),
        );
        if !self.install_transport(ActiveTransport::Stdio(Arc::clone(&session))) {
            tracing::warn!("shutdown began while stdio was starting; closing session");
            let closing = Arc::clone(&session);
            tokio::spawn(async move { closing.close().await });
            return Err(ServerError::Init("server has been shut down".to_string()));
        }
        tracing::info!("stdio transport started");
        Ok(session)
    }

    /// Builds the HTTP transport for this server without binding it.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] for an invalid bind address.
    pub fn http_transport(&self) -> Result<HttpTransport, ServerError> {
        let auth = AuthenticationFilter::new(
            self.config.server.http.auth_mode,
            OrganizationPolicy::from_upstream(&self.config.upstream),
            Arc::clone(&self.sessions),
            Arc::clone(&self.auth_audit),
        );
        HttpTransport::new(&self.config.server, self.dispatcher.clone(), auth)
    }

    /// Binds and starts the HTTP transport.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] when the server was already started or the
    /// listener cannot start.
    pub async fn start_http(&self) -> Result<SocketAddr, ServerError> {
        let transport = Arc::new(self.http_transport()?);
        self.mark_started()?;
        // Only the first installed provider wins; later calls are harmless.
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        let addr = transport.start().await?;
        if !self.install_transport(ActiveTransport::Http(Arc::clone(&transport))) {
            tracing::warn!("shutdown began while HTTP was binding; stopping listener");
            transport.stop(HTTP_STOP_GRACE).await;
            return Err(ServerError::Init("server has been shut down".to_string()));
        }
        Ok(addr)
    }

    /// Rejects a second start and a start after shutdown.
    fn mark_started(&self) -> Result<(), ServerError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(ServerError::Init("server has been shut down".to_string()));
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(ServerError::Init("server already started".to_string()));
        }
        Ok(())
    }

    /// Records the active transport and launches Phase 2.
    ///
    /// Returns false, installing nothing, once shutdown has begun. The flag is
    /// read under the transport lock, which `shutdown` takes after setting it.
    fn install_transport(&self, transport: ActiveTransport) -> bool {
        let mut active = self.transport.lock().unwrap_or_else(PoisonError::into_inner);
        if self.shut_down.load(Ordering::Acquire) {
            return false;
        }
        *active = Some(transport);
        self.spawn_background_init();
        true
    }

    /// Spawns Phase 2, or completes it immediately without a backend.
    fn spawn_background_init(&self) {
        let Some(backend) = self.backend.clone() else {
            self.state.send_replace(InitializationState::Completed);
            return;
        };
        let worker = tokio::spawn(run_background_init(
            backend,
            AnalyzerSet::from_keys(&self.config.backend.analyzers),
            Arc::clone(&self.registry),
            Arc::clone(&self.state),
            self.notifications.clone(),
        ));
        let abort = worker.abort_handle();
        let supervisor = tokio::spawn(supervise_background_init(worker, Arc::clone(&self.state)));
        *self.background.lock().unwrap_or_else(PoisonError::into_inner) = Some(BackgroundInit {
            supervisor,
            worker: abort,
        });
    }

    // ------------------------------------------------------------------------
    // Waiting
    // ------------------------------------------------------------------------

    /// Waits for Phase 2 to reach a terminal state.
    ///
    /// Returns `None` on timeout.
    pub async fn await_initialization(&self, timeout: Duration) -> Option<InitializationState> {
        let mut state = self.state.subscribe();
        match tokio::time::timeout(timeout, state.wait_for(|state| state.is_terminal())).await {
            Ok(Ok(state)) => Some(*state),
            Ok(Err(_)) | Err(_) => None,
        }
    }

    /// Waits until the transport stops serving.
    ///
    /// Returns immediately when no transport is running.
    pub async fn wait(&self) {
        let transport = self.transport.lock().unwrap_or_else(PoisonError::into_inner).clone();
        match transport {
            Some(ActiveTransport::Stdio(session)) => session.wait_closed().await,
            Some(ActiveTransport::Http(http)) => http.wait_stopped().await,
            None => {}
        }
    }

    // ------------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------------

    /// Stops the server. Only the first call does any work.
    ///
    /// Order: wait for Phase 2 (abort after the configured bound), stop the
    /// transport, release session bindings, close the upstream client, and
    /// shut down the backend.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("server shutting down");

        let (background, transport) = {
            let mut active = self.transport.lock().unwrap_or_else(PoisonError::into_inner);
            let background = self.background.lock().unwrap_or_else(PoisonError::into_inner).take();
            (background, active.take())
        };

        if let Some(BackgroundInit {
            mut supervisor,
            worker,
        }) = background
        {
            let wait = Duration::from_millis(self.config.lifecycle.init_shutdown_wait_ms);
            match tokio::time::timeout(wait, &mut supervisor).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(error = %err, "background initialization supervisor failed");
                    worker.abort();
                    mark_failed(&self.state);
                }
                Err(_) => {
                    tracing::warn!(?wait, "background initialization still running; aborting");
                    worker.abort();
                    supervisor.abort();
                    mark_failed(&self.state);
                }
            }
        }

        match transport {
            Some(ActiveTransport::Stdio(session)) => session.close().await,
            Some(ActiveTransport::Http(http)) => http.stop(HTTP_STOP_GRACE).await,
            None => {}
        }

        self.sessions.shutdown();
        if !self.upstream.close() {
            tracing::debug!("upstream client was already closed");
        }

        if let Some(backend) = &self.backend
            && let Err(err) = backend.shutdown().await
        {
            tracing::warn!(error = %err, "backend shutdown failed");
        }
        tracing::info!("server stopped");
    }
}

// ============================================================================
// SECTION: Background Initialization
// ============================================================================

/// Waits for the Phase 2 worker and fails the phase if it panicked or was
/// cancelled before reaching a terminal state.
async fn supervise_background_init(
    worker: JoinHandle<()>,
    state: Arc<watch::Sender<InitializationState>>,
) {
    match worker.await {
        Ok(()) => {}
        Err(err) if err.is_panic() => {
            tracing::error!("background initialization panicked; analysis tools unavailable");
            mark_failed(&state);
        }
        Err(_) => {
            tracing::warn!("background initialization cancelled");
            mark_failed(&state);
        }
    }
}

/// Moves a non-terminal Phase 2 state to `Failed`.
fn mark_failed(state: &watch::Sender<InitializationState>) {
    state.send_if_modified(|state| {
        if state.is_terminal() {
            return false;
        }
        *state = InitializationState::Failed;
        true
    });
}

/// Phase 2: initialize the backend and publish its tools.
async fn run_background_init(
    backend: Arc<dyn AnalysisBackend>,
    analyzers: AnalyzerSet,
    registry: Arc<ToolRegistry>,
    state: Arc<watch::Sender<InitializationState>>,
    notifications: broadcast::Sender<ServerNotification>,
) {
    state.send_replace(InitializationState::Running);
    tracing::info!(analyzers = analyzers.len(), "background initialization started");
    if let Err(err) = backend.initialize(&analyzers).await {
        tracing::error!(error = %err, "background initialization failed; analysis tools unavailable");
        state.send_replace(InitializationState::Failed);
        return;
    }
    if let Err(err) = registry.register_all(backend_tools(backend)) {
        tracing::error!(error = %err, "failed to register analysis tools");
        state.send_replace(InitializationState::Failed);
        return;
    }
    if notifications.receiver_count() > 0 {
        let _ = notifications.send(ServerNotification::ToolListChanged);
    }
    state.send_replace(InitializationState::Completed);
    tracing::info!(tools = registry.len(), "background initialization completed");
}
