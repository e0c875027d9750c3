//! Factory function for creating the broadcast fabric

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::{BroadcastConfig, RedisConfig};

use super::local::LocalBroadcast;
use super::noop::NoopBroadcast;
use super::redis_fabric::{RedisBroadcast, RedisRelay};
use super::traits::BroadcastFabric;

/// Create the broadcast fabric based on configuration.
///
/// For the Redis backend the returned relay must be spawned for local
/// members to receive anything.
pub fn create_fabric(
    config: &BroadcastConfig,
    redis: &RedisConfig,
    shutdown: &broadcast::Sender<()>,
) -> (Arc<dyn BroadcastFabric>, Option<RedisRelay>) {
    match config.backend.as_str() {
        "redis" => match RedisBroadcast::new(redis, config) {
            Ok(fabric) => {
                tracing::info!(
                    url = %redis.url,
                    channel_prefix = %config.channel_prefix,
                    "Creating Redis broadcast fabric"
                );
                let relay = fabric.relay(shutdown.subscribe());
                (Arc::new(fabric), Some(relay))
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Redis broadcast fabric unavailable, falling back to in-process groups"
                );
                (
                    Arc::new(LocalBroadcast::with_send_timeout(config.publish_timeout())),
                    None,
                )
            }
        },
        "none" | "disabled" => {
            tracing::warn!("Broadcast fabric disabled, heartbeats and shutdown notices will not be delivered");
            (Arc::new(NoopBroadcast::new()), None)
        }
        other => {
            if other != "memory" {
                tracing::warn!(backend = %other, "Unknown broadcast backend, using in-process groups");
            } else {
                tracing::info!("Using in-process broadcast groups");
            }
            (
                Arc::new(LocalBroadcast::with_send_timeout(config.publish_timeout())),
                None,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::FabricBackend;

    fn build(backend: &str, url: &str) -> (Arc<dyn BroadcastFabric>, Option<RedisRelay>) {
        let config = BroadcastConfig {
            backend: backend.to_string(),
            ..Default::default()
        };
        let redis = RedisConfig {
            url: url.to_string(),
        };
        let (tx, _) = broadcast::channel(1);
        create_fabric(&config, &redis, &tx)
    }

    #[test]
    fn test_memory_backend() {
        let (fabric, relay) = build("memory", "redis://localhost:6379");
        assert_eq!(fabric.backend_type(), FabricBackend::Memory);
        assert!(relay.is_none());
    }

    #[test]
    fn test_redis_backend_comes_with_relay() {
        let (fabric, relay) = build("redis", "redis://localhost:6379");
        assert_eq!(fabric.backend_type(), FabricBackend::Redis);
        assert!(relay.is_some());
    }

    #[test]
    fn test_redis_with_bad_url_falls_back() {
        let (fabric, relay) = build("redis", "not a url");
        assert_eq!(fabric.backend_type(), FabricBackend::Memory);
        assert!(relay.is_none());
    }

    #[test]
    fn test_disabled_backend() {
        let (fabric, _) = build("none", "redis://localhost:6379");
        assert_eq!(fabric.backend_type(), FabricBackend::Disabled);
        assert!(!fabric.is_available());
    }
}
