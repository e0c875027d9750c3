//! Per-connection protocol state
//!
//! A [`Connection`] is created once the handshake is accepted and lives until
//! the socket closes. Frames are processed one at a time by the reader task,
//! while broadcast events (heartbeat, shutdown) are handled concurrently by
//! the event task, so a shutdown drain can observe frames that are still in
//! flight.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::close_code;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::broadcast::{BroadcastEvent, BroadcastFabric, FabricError, GroupMember, HeartbeatPayload};
use crate::config::WebSocketConfig;
use crate::metrics::{ConnectionMetrics, ErrorKind, ErrorMetrics, MessageMetrics};
use crate::session::{SessionOrigin, SessionStore, SessionStoreError};

use super::message::{OutboundFrame, ServerMessage};

const SHUTTING_DOWN_ERROR: &str = "Server is shutting down";

/// Timing of the drain sequence run when a shutdown event arrives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainConfig {
    /// Upper bound on waiting for in-flight frames
    pub drain_timeout: Duration,
    /// How often the pending count is checked while draining
    pub poll_interval: Duration,
    /// Pause between the goodbye and the close frame
    pub close_grace: Duration,
}

impl DrainConfig {
    pub fn from_config(config: &WebSocketConfig) -> Self {
        Self {
            drain_timeout: config.drain_timeout(),
            poll_interval: config.drain_poll_interval(),
            close_grace: config.close_grace_period(),
        }
    }
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self::from_config(&WebSocketConfig::default())
    }
}

/// Shared dependencies handed to every new connection
#[derive(Clone)]
pub struct ConnectionContext {
    pub store: Arc<dyn SessionStore>,
    pub fabric: Arc<dyn BroadcastFabric>,
    pub group: String,
    pub drain: DrainConfig,
    pub channel_buffer_size: usize,
    live: Arc<AtomicUsize>,
}

impl ConnectionContext {
    pub fn new(
        store: Arc<dyn SessionStore>,
        fabric: Arc<dyn BroadcastFabric>,
        config: &WebSocketConfig,
    ) -> Self {
        Self {
            store,
            fabric,
            group: config.group_name.clone(),
            drain: DrainConfig::from_config(config),
            channel_buffer_size: config.channel_buffer_size,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Override the drain timing
    pub fn with_drain(mut self, drain: DrainConfig) -> Self {
        self.drain = drain;
        self
    }

    /// Connections opened through this context and not yet disconnected
    pub fn live_connections(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

/// Connection setup failures; the socket is closed with 1011
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Failed to resolve session: {0}")]
    Session(#[from] SessionStoreError),

    #[error("Failed to join broadcast group: {0}")]
    Join(#[from] FabricError),
}

/// Per-frame failures; reported to the client, connection stays open
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Invalid UTF-8 payload")]
    Decode(#[from] std::str::Utf8Error),

    #[error("Failed to persist message count: {0}")]
    Store(#[from] SessionStoreError),
}

impl ProcessingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProcessingError::Decode(_) => ErrorKind::Decode,
            ProcessingError::Store(_) => ErrorKind::MessageProcessing,
        }
    }

    /// Text placed in the `error` field of the reply
    pub fn client_message(&self) -> &'static str {
        match self {
            ProcessingError::Decode(_) => "Invalid UTF-8 payload",
            ProcessingError::Store(_) => "Message processing failed",
        }
    }
}

/// Lifecycle state of an accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Draining,
    Closed,
}

/// Result of a completed drain sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainOutcome {
    pub inflight_completed: bool,
    /// Frames still in flight when the goodbye was sent
    pub remaining: usize,
    pub waited: Duration,
}

/// Marks one frame as in flight until dropped
pub struct InFlight<'a> {
    pending: &'a AtomicUsize,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

/// An accepted connection plus the receiver its broadcast events arrive on
pub struct Accepted {
    pub connection: Arc<Connection>,
    pub events: mpsc::Receiver<BroadcastEvent>,
}

pub struct Connection {
    pub id: Uuid,
    session_id: String,
    origin: SessionOrigin,
    message_count: AtomicU64,
    pending: AtomicUsize,
    shutting_down: AtomicBool,
    closed: AtomicBool,
    joined: bool,
    connected_at: Instant,
    outbound: mpsc::Sender<OutboundFrame>,
    ctx: ConnectionContext,
}

impl Connection {
    /// Resolve the session, join the default group and mark the connection open.
    ///
    /// A join that succeeded is rolled back if anything after it fails, and the
    /// session reference taken from the store is released.
    pub async fn connect(
        ctx: &ConnectionContext,
        session_id: Option<&str>,
        outbound: mpsc::Sender<OutboundFrame>,
    ) -> Result<Accepted, ConnectionError> {
        let resolved = match ctx.store.get_or_create(session_id).await {
            Ok(resolved) => resolved,
            Err(e) => {
                ErrorMetrics::record(ErrorKind::Connection);
                return Err(e.into());
            }
        };

        let id = Uuid::new_v4();
        let (member, events) = GroupMember::channel(id, ctx.channel_buffer_size);

        let joined = if ctx.fabric.is_available() {
            if let Err(e) = ctx.fabric.join(&ctx.group, member).await {
                ErrorMetrics::record(ErrorKind::Connection);
                // Best-effort cleanup of the partial registration
                let _ = ctx.fabric.leave(&ctx.group, id).await;
                if let Err(release_err) = ctx.store.release(&resolved.session.id).await {
                    tracing::warn!(
                        session_id = %resolved.session.id,
                        error = %release_err,
                        "Failed to release session after join failure"
                    );
                }
                return Err(e.into());
            }
            true
        } else {
            tracing::warn!(
                connection_id = %id,
                group = %ctx.group,
                "Broadcast fabric unavailable, connection will not receive heartbeats or shutdown notices"
            );
            false
        };

        ConnectionMetrics::record_opened();
        ctx.live.fetch_add(1, Ordering::SeqCst);

        tracing::info!(
            connection_id = %id,
            session_id = %resolved.session.id,
            origin = resolved.origin.as_str(),
            message_count = resolved.session.message_count,
            "WebSocket connection established"
        );

        let connection = Arc::new(Self {
            id,
            session_id: resolved.session.id,
            origin: resolved.origin,
            message_count: AtomicU64::new(resolved.session.message_count),
            pending: AtomicUsize::new(0),
            shutting_down: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            joined,
            connected_at: Instant::now(),
            outbound,
            ctx: ctx.clone(),
        });

        Ok(Accepted { connection, events })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn origin(&self) -> SessionOrigin {
        self.origin
    }

    pub fn message_count(&self) -> u64 {
        self.message_count.load(Ordering::SeqCst)
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ConnectionState {
        if self.closed.load(Ordering::SeqCst) {
            ConnectionState::Closed
        } else if self.is_shutting_down() {
            ConnectionState::Draining
        } else {
            ConnectionState::Open
        }
    }

    /// Count one frame as in flight for as long as the guard lives
    pub fn begin_processing(&self) -> InFlight<'_> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        InFlight {
            pending: &self.pending,
        }
    }

    /// Handle a text frame. Returns false once the connection should close.
    pub async fn on_message(&self, raw: &str) -> bool {
        if self.is_shutting_down() {
            self.reject_while_draining().await;
            return true;
        }
        let _in_flight = self.begin_processing();
        self.process(Ok(raw)).await
    }

    /// Handle a binary frame, decoded as UTF-8 text
    pub async fn on_binary(&self, raw: &[u8]) -> bool {
        if self.is_shutting_down() {
            self.reject_while_draining().await;
            return true;
        }
        let _in_flight = self.begin_processing();
        let decoded = std::str::from_utf8(raw).map_err(ProcessingError::from);
        self.process(decoded).await
    }

    async fn process(&self, decoded: Result<&str, ProcessingError>) -> bool {
        let raw = match decoded {
            Ok(raw) => raw,
            Err(e) => {
                self.report_failure(e).await;
                return true;
            }
        };

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            tracing::debug!(connection_id = %self.id, "Ignoring empty message");
            return true;
        }

        if trimmed.to_lowercase() == "goodbye" {
            let total = self.message_count();
            tracing::info!(
                connection_id = %self.id,
                session_id = %self.session_id,
                total,
                "Client said goodbye"
            );
            self.send(ServerMessage::goodbye(total)).await;
            self.close(close_code::NORMAL, "Goodbye").await;
            return false;
        }

        match self.count_message().await {
            Ok(count) => {
                tracing::debug!(
                    connection_id = %self.id,
                    session_id = %self.session_id,
                    count,
                    "Message counted"
                );
                self.send(ServerMessage::count(count, &self.session_id, raw))
                    .await;
            }
            Err(e) => self.report_failure(e).await,
        }
        true
    }

    async fn count_message(&self) -> Result<u64, ProcessingError> {
        let count = self.message_count.fetch_add(1, Ordering::SeqCst) + 1;
        if let Err(e) = self.ctx.store.update_count(&self.session_id, count).await {
            self.message_count.fetch_sub(1, Ordering::SeqCst);
            return Err(e.into());
        }
        MessageMetrics::record_accepted();
        Ok(count)
    }

    async fn report_failure(&self, error: ProcessingError) {
        ErrorMetrics::record(error.kind());
        tracing::warn!(
            connection_id = %self.id,
            session_id = %self.session_id,
            error_type = error.kind().as_str(),
            error = %error,
            "Message processing failed"
        );
        self.send(ServerMessage::error(error.client_message(), &self.session_id))
            .await;
    }

    async fn reject_while_draining(&self) {
        tracing::debug!(connection_id = %self.id, "Rejecting message during shutdown");
        self.send(ServerMessage::error(SHUTTING_DOWN_ERROR, &self.session_id))
            .await;
    }

    /// Dispatch a broadcast event. Returns false after the shutdown sequence.
    pub async fn on_event(&self, event: BroadcastEvent) -> bool {
        match event {
            BroadcastEvent::Heartbeat { message } => {
                self.on_heartbeat(message).await;
                true
            }
            BroadcastEvent::Shutdown => {
                self.on_shutdown().await;
                false
            }
        }
    }

    pub async fn on_heartbeat(&self, payload: HeartbeatPayload) {
        if self.try_send(ServerMessage::Heartbeat(payload)).await.is_err() {
            ErrorMetrics::record(ErrorKind::Heartbeat);
            tracing::warn!(connection_id = %self.id, "Failed to forward heartbeat");
        }
    }

    /// Drain in-flight frames, say goodbye and close with 1001.
    ///
    /// Returns `None` if a drain already ran on this connection.
    pub async fn on_shutdown(&self) -> Option<DrainOutcome> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            tracing::debug!(connection_id = %self.id, "Shutdown already in progress");
            return None;
        }

        let drain = self.ctx.drain;
        let started = Instant::now();
        tracing::info!(
            connection_id = %self.id,
            pending = self.pending(),
            drain_timeout_ms = drain.drain_timeout.as_millis() as u64,
            "Server shutdown initiated, draining in-flight messages"
        );

        while self.pending() > 0 && started.elapsed() < drain.drain_timeout {
            tokio::time::sleep(drain.poll_interval).await;
        }

        let remaining = self.pending();
        let waited = started.elapsed();
        if remaining > 0 {
            tracing::warn!(
                connection_id = %self.id,
                remaining,
                waited_ms = waited.as_millis() as u64,
                "Drain timed out with messages still in flight"
            );
        }

        let outcome = DrainOutcome {
            inflight_completed: remaining == 0,
            remaining,
            waited,
        };

        let goodbye = ServerMessage::shutdown_goodbye(self.message_count(), outcome.inflight_completed);
        if self.try_send(goodbye).await.is_err() {
            ErrorMetrics::record(ErrorKind::Shutdown);
            tracing::warn!(connection_id = %self.id, "Failed to send shutdown goodbye");
        }

        tokio::time::sleep(drain.close_grace).await;
        self.close(close_code::AWAY, "Server shutting down").await;

        Some(outcome)
    }

    /// Release everything taken in `connect`. Only the first call has effect.
    pub async fn disconnect(&self, code: Option<u16>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let duration = self.connected_at.elapsed();
        let pending = self.pending();
        if pending > 0 {
            tracing::warn!(
                connection_id = %self.id,
                session_id = %self.session_id,
                pending,
                "Connection closed with messages still in flight"
            );
        }

        if self.joined {
            if let Err(e) = self.ctx.fabric.leave(&self.ctx.group, self.id).await {
                ErrorMetrics::record(ErrorKind::Disconnect);
                tracing::warn!(connection_id = %self.id, error = %e, "Failed to leave broadcast group");
            }
        }

        if let Err(e) = self.ctx.store.release(&self.session_id).await {
            ErrorMetrics::record(ErrorKind::Disconnect);
            tracing::warn!(session_id = %self.session_id, error = %e, "Failed to release session");
        }

        ConnectionMetrics::record_closed(duration);
        self.ctx.live.fetch_sub(1, Ordering::SeqCst);

        tracing::info!(
            connection_id = %self.id,
            session_id = %self.session_id,
            close_code = ?code,
            total_messages = self.message_count(),
            was_shutting_down = self.is_shutting_down(),
            duration_secs = duration.as_secs_f64(),
            "WebSocket connection closed"
        );
    }

    async fn send(&self, message: ServerMessage) {
        if self.try_send(message).await.is_err() {
            tracing::debug!(connection_id = %self.id, "Writer gone, reply dropped");
        }
    }

    async fn try_send(&self, message: ServerMessage) -> Result<(), ()> {
        self.outbound
            .send(OutboundFrame::Message(message))
            .await
            .map_err(|_| ())
    }

    async fn close(&self, code: u16, reason: &'static str) {
        let _ = self.outbound.send(OutboundFrame::Close { code, reason }).await;
    }
}
