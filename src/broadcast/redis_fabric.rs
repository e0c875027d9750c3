//! Redis pub/sub broadcast fabric for multi-node deployments.
//!
//! Membership stays local to each node. `publish` sends an envelope to
//! `<prefix>:<group>`; every node runs a [`RedisRelay`] that pattern-subscribes
//! to `<prefix>:*` and fans received envelopes out to its local members. The
//! publishing node receives its own envelope through the relay as well, so
//! local members are reached exactly through one path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::config::{BroadcastConfig, RedisConfig};

use super::backoff::ExponentialBackoff;
use super::local::LocalBroadcast;
use super::traits::BroadcastFabric;
use super::types::{BroadcastEvent, FabricBackend, FabricError, GroupMember, PublishReport};

/// Message format exchanged between nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub group: String,
    pub event: BroadcastEvent,
}

/// Broadcast fabric relaying group events through Redis
pub struct RedisBroadcast {
    client: Client,
    /// Multiplexed connection used for PUBLISH
    connection: RwLock<Option<MultiplexedConnection>>,
    local: Arc<LocalBroadcast>,
    channel_prefix: String,
    connected: Arc<AtomicBool>,
}

impl RedisBroadcast {
    /// Create the fabric. Only validates the URL; no connection is opened yet.
    pub fn new(redis: &RedisConfig, config: &BroadcastConfig) -> Result<Self, FabricError> {
        let client = Client::open(redis.url.as_str())?;
        Ok(Self {
            client,
            connection: RwLock::new(None),
            local: Arc::new(LocalBroadcast::with_send_timeout(config.publish_timeout())),
            channel_prefix: config.channel_prefix.clone(),
            connected: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Redis channel a group is published on
    pub fn channel_for(&self, group: &str) -> String {
        format!("{}:{}", self.channel_prefix, group)
    }

    /// Build the subscriber loop feeding this node's members
    pub fn relay(&self, shutdown: broadcast::Receiver<()>) -> RedisRelay {
        RedisRelay {
            client: self.client.clone(),
            local: self.local.clone(),
            channel_prefix: self.channel_prefix.clone(),
            connected: self.connected.clone(),
            shutdown,
        }
    }

    async fn get_connection(&self) -> Result<MultiplexedConnection, FabricError> {
        {
            let conn = self.connection.read().await;
            if let Some(ref c) = *conn {
                return Ok(c.clone());
            }
        }

        let mut guard = self.connection.write().await;
        if let Some(ref c) = *guard {
            return Ok(c.clone());
        }

        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| FabricError::Unavailable(e.to_string()))?;
        *guard = Some(conn.clone());
        tracing::info!("Redis broadcast connection established");
        Ok(conn)
    }

    async fn reset_connection(&self) {
        *self.connection.write().await = None;
        self.connected.store(false, Ordering::Release);
    }
}

#[async_trait]
impl BroadcastFabric for RedisBroadcast {
    fn backend_type(&self) -> FabricBackend {
        FabricBackend::Redis
    }

    fn is_available(&self) -> bool {
        true
    }

    /// Whether the last Redis interaction succeeded
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn join(&self, group: &str, member: GroupMember) -> Result<(), FabricError> {
        self.local.join(group, member).await
    }

    async fn leave(&self, group: &str, member_id: Uuid) -> Result<(), FabricError> {
        self.local.leave(group, member_id).await
    }

    async fn publish(
        &self,
        group: &str,
        event: BroadcastEvent,
    ) -> Result<PublishReport, FabricError> {
        let payload = serde_json::to_string(&Envelope {
            group: group.to_string(),
            event,
        })?;
        let channel = self.channel_for(group);

        let mut conn = self.get_connection().await?;
        match conn.publish::<_, _, usize>(&channel, payload).await {
            Ok(receivers) => {
                self.connected.store(true, Ordering::Release);
                Ok(PublishReport {
                    delivered: receivers,
                    failed: 0,
                })
            }
            Err(e) => {
                self.reset_connection().await;
                Err(FabricError::Unavailable(e.to_string()))
            }
        }
    }

    fn member_count(&self, group: &str) -> usize {
        self.local.member_count(group)
    }
}

/// Subscriber loop relaying Redis envelopes to local group members
pub struct RedisRelay {
    client: Client,
    local: Arc<LocalBroadcast>,
    channel_prefix: String,
    connected: Arc<AtomicBool>,
    shutdown: broadcast::Receiver<()>,
}

impl RedisRelay {
    /// Run until the shutdown signal, reconnecting with backoff on errors
    pub async fn run(mut self) {
        let pattern = format!("{}:*", self.channel_prefix);
        let mut backoff = ExponentialBackoff::new();

        tracing::info!(pattern = %pattern, "Starting Redis broadcast relay");

        loop {
            match self.run_subscription(&pattern, &mut backoff).await {
                Ok(()) => {
                    tracing::info!("Redis broadcast relay stopped");
                    break;
                }
                Err(e) => {
                    self.connected.store(false, Ordering::Release);
                    let delay = backoff.next_delay();
                    tracing::error!(
                        error = %e,
                        attempt = backoff.attempt(),
                        retry_in_ms = delay.as_millis() as u64,
                        "Redis broadcast relay error, reconnecting"
                    );
                    tokio::select! {
                        _ = self.shutdown.recv() => {
                            tracing::info!("Redis broadcast relay stopped during reconnect");
                            break;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Returns `Ok` on shutdown, `Err` when the subscription is lost
    async fn run_subscription(
        &mut self,
        pattern: &str,
        backoff: &mut ExponentialBackoff,
    ) -> Result<(), FabricError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.psubscribe(pattern).await?;

        self.connected.store(true, Ordering::Release);
        backoff.reset();
        tracing::info!(pattern = %pattern, "Redis broadcast subscription established");

        let mut messages = pubsub.on_message();

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    return Ok(());
                }
                msg = messages.next() => {
                    let Some(msg) = msg else {
                        return Err(FabricError::Unavailable(
                            "Redis message stream ended".to_string(),
                        ));
                    };
                    let payload: String = match msg.get_payload() {
                        Ok(p) => p,
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to read broadcast payload");
                            continue;
                        }
                    };
                    self.relay_envelope(msg.get_channel_name(), &payload).await;
                }
            }
        }
    }

    async fn relay_envelope(&self, channel: &str, payload: &str) {
        let envelope: Envelope = match serde_json::from_str(payload) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    channel = %channel,
                    payload = %payload,
                    "Failed to parse broadcast envelope"
                );
                return;
            }
        };

        let kind = envelope.event.kind();
        match self.local.publish(&envelope.group, envelope.event).await {
            Ok(report) => {
                tracing::debug!(
                    group = %envelope.group,
                    kind = kind,
                    delivered = report.delivered,
                    failed = report.failed,
                    "Relayed broadcast event"
                );
            }
            Err(e) => {
                tracing::warn!(group = %envelope.group, error = %e, "Failed to relay broadcast event");
            }
        }
    }
}
