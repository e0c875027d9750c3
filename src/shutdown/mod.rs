//! Graceful shutdown handling for the counter service.
//!
//! On a termination signal the process:
//! 1. Marks itself as shutting down (readiness turns 503)
//! 2. Broadcasts the shutdown event so every connection drains and closes
//! 3. Waits for open connections to go away
//! 4. Stops the heartbeat and signals remaining background tasks

mod coordinator;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use crate::config::WebSocketConfig;
use crate::metrics::ShutdownMetrics;
use crate::server::HealthState;
use crate::tasks::{HeartbeatService, DEFAULT_STOP_TIMEOUT};
use crate::websocket::ConnectionContext;

pub use coordinator::ShutdownCoordinator;

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time to wait for connections to close (default: 10 seconds)
    pub connection_timeout: Duration,
    /// How often the open connection count is checked (default: 100 ms)
    pub poll_interval: Duration,
    /// Time to wait for the heartbeat loop to stop (default: 5 seconds)
    pub heartbeat_stop_timeout: Duration,
}

impl ShutdownConfig {
    pub fn from_config(config: &WebSocketConfig) -> Self {
        Self {
            connection_timeout: config.graceful_shutdown_timeout(),
            poll_interval: config.drain_poll_interval(),
            heartbeat_stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self::from_config(&WebSocketConfig::default())
    }
}

/// Runs the process shutdown sequence
pub struct GracefulShutdown {
    coordinator: Arc<ShutdownCoordinator>,
    heartbeat: Arc<HeartbeatService>,
    health: Arc<HealthState>,
    connections: ConnectionContext,
    shutdown_tx: broadcast::Sender<()>,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(
        coordinator: Arc<ShutdownCoordinator>,
        heartbeat: Arc<HeartbeatService>,
        health: Arc<HealthState>,
        connections: ConnectionContext,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        Self {
            coordinator,
            heartbeat,
            health,
            connections,
            shutdown_tx,
            config: ShutdownConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ShutdownConfig) -> Self {
        self.config = config;
        self
    }

    /// Execute graceful shutdown sequence
    #[tracing::instrument(
        name = "graceful_shutdown",
        skip(self),
        fields(open_connections = self.connections.live_connections())
    )]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = Instant::now();
        let mut result = ShutdownResult::default();

        if !self.health.mark_shutting_down() {
            tracing::warn!(reason = %reason, "Shutdown already in progress");
            return result;
        }

        tracing::info!(reason = %reason, "Starting graceful shutdown - Phase 1: Notifying connections");
        result.clients_notified = self
            .coordinator
            .trigger()
            .await
            .map(|report| report.delivered)
            .unwrap_or(0);

        tracing::info!("Phase 2: Waiting for connections to close");
        result.remaining_connections = self.wait_for_connections_to_close().await;

        tracing::info!("Phase 3: Stopping background tasks");
        result.heartbeat_stopped = self.heartbeat.stop(self.config.heartbeat_stop_timeout).await;
        let _ = self.shutdown_tx.send(());

        result.duration = start.elapsed();
        result.success = result.remaining_connections == 0 && result.heartbeat_stopped;
        ShutdownMetrics::record_shutdown_time(result.duration);

        tracing::info!(
            clients_notified = result.clients_notified,
            remaining_connections = result.remaining_connections,
            heartbeat_stopped = result.heartbeat_stopped,
            duration_ms = result.duration.as_millis() as u64,
            "Graceful shutdown completed"
        );

        result
    }

    /// Returns the number of connections still open when the wait ended
    async fn wait_for_connections_to_close(&self) -> usize {
        let deadline = Instant::now() + self.config.connection_timeout;

        loop {
            let open = self.connections.live_connections();
            if open == 0 {
                return 0;
            }
            if Instant::now() >= deadline {
                tracing::warn!(
                    remaining_connections = open,
                    timeout_secs = self.config.connection_timeout.as_secs_f64(),
                    "Some connections did not close gracefully"
                );
                return open;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

/// Result of a graceful shutdown operation
#[derive(Debug, Default)]
pub struct ShutdownResult {
    /// Whether every connection closed and the heartbeat stopped in time
    pub success: bool,
    /// Connections the shutdown event was delivered to
    pub clients_notified: usize,
    /// Connections still open after the wait
    pub remaining_connections: usize,
    pub heartbeat_stopped: bool,
    /// Total time taken for shutdown
    pub duration: Duration,
}
