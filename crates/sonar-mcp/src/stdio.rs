// crates/sonar-mcp/src/stdio.rs
// ============================================================================
// Module: Stdio Transport
// Description: Newline-delimited JSON-RPC over a byte stream pair.
// Purpose: Serve a single local client over the process stdin and stdout.
// Dependencies: tokio, serde_json, tracing
// ============================================================================

//! ## Overview
//! A [`StdioSession`] runs two tasks. The reader parses one JSON-RPC message
//! per line and dispatches requests sequentially. The writer owns the output
//! stream and is the only task that writes to it: responses and
//! server-initiated notifications are funneled through it, one message per
//! line, flushed after each.
//!
//! The session ends on input EOF or on [`StdioSession::close`], which waits a
//! bounded grace period before aborting the tasks.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::context::TransportContext;
use crate::dispatch::McpDispatcher;
use crate::rpc::ServerNotification;
use crate::rpc::parse_request;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Outbound queue depth between the reader and the writer.
const OUTBOUND_CAPACITY: usize = 64;

// ============================================================================
// SECTION: Session
// ============================================================================

/// Running stdio session.
#[derive(Debug)]
pub struct StdioSession {
    /// Signals the reader to stop.
    shutdown: watch::Sender<bool>,
    /// Flips to true once both tasks are done.
    finished: Arc<watch::Sender<bool>>,
    /// Set once [`StdioSession::close`] has begun.
    closing: AtomicBool,
    /// Reader task handle.
    reader: Mutex<Option<JoinHandle<()>>>,
    /// Writer task handle.
    writer: Mutex<Option<JoinHandle<()>>>,
    /// Total wait bound for both tasks in [`StdioSession::close`].
    grace: Duration,
}

impl StdioSession {
    /// Spawns the reader and writer tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<R, W>(
        input: R,
        output: W,
        dispatcher: McpDispatcher,
        context: TransportContext,
        notifications: broadcast::Receiver<ServerNotification>,
        grace: Duration,
    ) -> Arc<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let (finished, _) = watch::channel(false);
        let finished = Arc::new(finished);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let initialized = Arc::new(AtomicBool::new(false));

        let reader = tokio::spawn(read_loop(
            BufReader::new(input),
            dispatcher,
            context,
            outbound_tx,
            Arc::clone(&initialized),
            shutdown_rx,
        ));
        let writer = tokio::spawn(write_loop(
            output,
            outbound_rx,
            notifications,
            initialized,
            Arc::clone(&finished),
        ));
        Arc::new(Self {
            shutdown,
            finished,
            closing: AtomicBool::new(false),
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            grace,
        })
    }

    /// Returns true once both tasks have exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }

    /// Waits until the session ends, either on EOF or after a close.
    pub async fn wait_closed(&self) {
        let mut finished = self.finished.subscribe();
        let _ = finished.wait_for(|done| *done).await;
    }

    /// Stops the session. Repeated calls are no-ops.
    ///
    /// Both tasks share one deadline of `grace` from the call.
    pub async fn close(&self) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.send_replace(true);
        let deadline = Instant::now() + self.grace;
        let reader = self.reader.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = reader {
            join_or_abort(handle, deadline, "reader").await;
        }
        let writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = writer {
            join_or_abort(handle, deadline, "writer").await;
        }
        self.finished.send_replace(true);
    }
}

/// Waits for a task until `deadline`, aborting it once the deadline passes.
async fn join_or_abort(mut handle: JoinHandle<()>, deadline: Instant, task: &str) {
    match tokio::time::timeout_at(deadline, &mut handle).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::warn!(task, error = %err, "stdio task ended abnormally"),
        Err(_) => {
            tracing::warn!(task, "stdio task did not stop before the close deadline");
            handle.abort();
        }
    }
}

// ============================================================================
// SECTION: Tasks
// ============================================================================

/// Reads lines, dispatches them, and queues the responses.
async fn read_loop<R>(
    input: BufReader<R>,
    dispatcher: McpDispatcher,
    context: TransportContext,
    outbound: mpsc::Sender<String>,
    initialized: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = input.lines();
    while !*shutdown.borrow() {
        let line = tokio::select! {
            _ = shutdown.changed() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::debug!("stdio input closed");
                break;
            }
            Err(err) => {
                tracing::warn!(error = %err, "stdio read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let (response, opens_session) = match parse_request(line.as_bytes()) {
            Ok(request) => {
                let opens_session =
                    matches!(request.method.as_str(), "initialize" | "notifications/initialized");
                (dispatcher.dispatch(request, &context).await, opens_session)
            }
            Err(error) => (Some(*error), false),
        };
        if let Some(response) = response {
            match serde_json::to_string(&response) {
                Ok(text) => {
                    if outbound.send(text).await.is_err() {
                        break;
                    }
                }
                Err(err) => tracing::warn!(error = %err, "failed to serialize stdio response"),
            }
        }
        // Notifications are forwarded only after the handshake response is queued.
        if opens_session {
            initialized.store(true, Ordering::Release);
        }
    }
}

/// Writes queued responses and forwarded notifications, one per line.
async fn write_loop<W>(
    mut output: W,
    mut outbound: mpsc::Receiver<String>,
    mut notifications: broadcast::Receiver<ServerNotification>,
    initialized: Arc<AtomicBool>,
    finished: Arc<watch::Sender<bool>>,
) where
    W: AsyncWrite + Unpin,
{
    let mut notifications_open = true;
    loop {
        let line = tokio::select! {
            biased;
            message = outbound.recv() => match message {
                Some(text) => text,
                None => break,
            },
            notification = notifications.recv(), if notifications_open => match notification {
                Ok(notification) if initialized.load(Ordering::Acquire) => {
                    notification.to_value().to_string()
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "stdio notifications lagged");
                    continue;
                }
                Err(RecvError::Closed) => {
                    notifications_open = false;
                    continue;
                }
            },
        };
        if let Err(err) = write_line(&mut output, &line).await {
            tracing::warn!(error = %err, "stdio write failed");
            break;
        }
    }
    let _ = output.shutdown().await;
    finished.send_replace(true);
}

/// Writes one message followed by a newline and flushes.
async fn write_line<W>(output: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    output.write_all(line.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await
}
