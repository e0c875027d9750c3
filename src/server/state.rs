use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use crate::broadcast::{create_fabric, BroadcastFabric, RedisRelay};
use crate::config::Settings;
use crate::session::{create_session_store, SessionStore};
use crate::shutdown::{GracefulShutdown, ShutdownConfig, ShutdownCoordinator};
use crate::tasks::HeartbeatService;
use crate::websocket::ConnectionContext;

/// Liveness and readiness bookkeeping
#[derive(Debug)]
pub struct HealthState {
    started_at: Instant,
    startup_delay: Duration,
    shutting_down: AtomicBool,
}

impl HealthState {
    pub fn new(startup_delay: Duration) -> Self {
        Self {
            started_at: Instant::now(),
            startup_delay,
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Ready once the startup delay has passed, until shutdown begins
    pub fn is_ready(&self) -> bool {
        self.uptime() >= self.startup_delay && !self.is_shutting_down()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Returns false if shutdown was already marked
    pub fn mark_shutting_down(&self) -> bool {
        !self.shutting_down.swap(true, Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub connections: ConnectionContext,
    pub health: Arc<HealthState>,
    pub heartbeat: Arc<HeartbeatService>,
    pub coordinator: Arc<ShutdownCoordinator>,
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    /// Build the store and fabric from settings.
    ///
    /// With the Redis fabric the returned relay must be spawned.
    pub fn new(settings: Settings) -> (Self, Option<RedisRelay>) {
        let (shutdown_tx, _) = broadcast::channel(1);
        let session_store = create_session_store(&settings.session);
        let (fabric, relay) = create_fabric(&settings.broadcast, &settings.redis, &shutdown_tx);

        let state = Self::with_components(settings, session_store, fabric, shutdown_tx);
        (state, relay)
    }

    pub fn with_components(
        settings: Settings,
        session_store: Arc<dyn SessionStore>,
        fabric: Arc<dyn BroadcastFabric>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        let ws = &settings.websocket;
        let connections = ConnectionContext::new(session_store, fabric.clone(), ws);
        let heartbeat = Arc::new(HeartbeatService::new(
            fabric.clone(),
            ws.group_name.clone(),
            ws.heartbeat_interval(),
        ));
        let coordinator = Arc::new(ShutdownCoordinator::new(fabric, ws.group_name.clone()));
        let health = Arc::new(HealthState::new(Duration::from_secs(
            settings.health.startup_delay,
        )));

        Self {
            settings: Arc::new(settings),
            connections,
            health,
            heartbeat,
            coordinator,
            shutdown_tx,
        }
    }

    pub fn graceful_shutdown(&self) -> GracefulShutdown {
        GracefulShutdown::new(
            self.coordinator.clone(),
            self.heartbeat.clone(),
            self.health.clone(),
            self.connections.clone(),
            self.shutdown_tx.clone(),
        )
        .with_config(ShutdownConfig::from_config(&self.settings.websocket))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::FabricBackend;

    #[test]
    fn test_ready_after_startup_delay() {
        let health = HealthState::new(Duration::ZERO);
        assert!(health.is_ready());

        let delayed = HealthState::new(Duration::from_secs(3600));
        assert!(!delayed.is_ready());
    }

    #[test]
    fn test_not_ready_once_shutting_down() {
        let health = HealthState::new(Duration::ZERO);

        assert!(health.mark_shutting_down());
        assert!(!health.mark_shutting_down());

        assert!(health.is_shutting_down());
        assert!(!health.is_ready());
    }

    #[tokio::test]
    async fn test_default_state_uses_memory_components() {
        let (state, relay) = AppState::new(Settings::default());

        assert!(relay.is_none());
        assert_eq!(state.connections.fabric.backend_type(), FabricBackend::Memory);
        assert_eq!(state.connections.group, "chat_all");
        assert_eq!(state.connections.live_connections(), 0);
    }
}
