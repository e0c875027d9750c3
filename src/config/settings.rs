use config::{Config, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Heartbeat interval in seconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
    /// Graceful shutdown budget in seconds; the per-connection drain window is derived from it
    #[serde(default = "default_graceful_shutdown_timeout")]
    pub graceful_shutdown_timeout: u64,
    /// How often a draining connection re-checks its in-flight count
    #[serde(default = "default_drain_poll_interval_ms")]
    pub drain_poll_interval_ms: u64,
    /// Delay between the shutdown goodbye and the going-away close frame
    #[serde(default = "default_close_grace_period_ms")]
    pub close_grace_period_ms: u64,
    /// Broadcast group every connection joins
    #[serde(default = "default_group_name")]
    pub group_name: String,
    /// Capacity of each connection's outbound and event channels
    #[serde(default = "default_channel_buffer_size")]
    pub channel_buffer_size: usize,
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_graceful_shutdown_timeout() -> u64 {
    10
}

fn default_drain_poll_interval_ms() -> u64 {
    100
}

fn default_close_grace_period_ms() -> u64 {
    500
}

fn default_group_name() -> String {
    "chat_all".to_string()
}

fn default_channel_buffer_size() -> usize {
    32
}

/// Upper bound of the per-connection drain window
const MAX_DRAIN_SECS: u64 = 5;

/// Part of the shutdown budget kept for closing frames and teardown
const DRAIN_CLEANUP_BUFFER_SECS: u64 = 2;

impl WebSocketConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval)
    }

    pub fn graceful_shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.graceful_shutdown_timeout)
    }

    /// `min(graceful_shutdown_timeout - 2, 5)` seconds, never negative.
    pub fn drain_timeout(&self) -> Duration {
        let secs = self
            .graceful_shutdown_timeout
            .saturating_sub(DRAIN_CLEANUP_BUFFER_SECS)
            .min(MAX_DRAIN_SECS);
        Duration::from_secs(secs)
    }

    pub fn drain_poll_interval(&self) -> Duration {
        Duration::from_millis(self.drain_poll_interval_ms)
    }

    pub fn close_grace_period(&self) -> Duration {
        Duration::from_millis(self.close_grace_period_ms)
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            graceful_shutdown_timeout: default_graceful_shutdown_timeout(),
            drain_poll_interval_ms: default_drain_poll_interval_ms(),
            close_grace_period_ms: default_close_grace_period_ms(),
            group_name: default_group_name(),
            channel_buffer_size: default_channel_buffer_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastConfig {
    /// "memory", "redis" or "none"
    #[serde(default = "default_broadcast_backend")]
    pub backend: String,
    /// Redis channel prefix; groups are published on `<prefix>:<group>`
    #[serde(default = "default_channel_prefix")]
    pub channel_prefix: String,
    /// Per-member delivery timeout
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
}

fn default_broadcast_backend() -> String {
    "memory".to_string()
}

fn default_channel_prefix() -> String {
    "wsc:broadcast".to_string()
}

fn default_publish_timeout_ms() -> u64 {
    5000
}

impl BroadcastConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            backend: default_broadcast_backend(),
            channel_prefix: default_channel_prefix(),
            publish_timeout_ms: default_publish_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Only "memory" is provided
    #[serde(default = "default_session_backend")]
    pub backend: String,
}

fn default_session_backend() -> String {
    "memory".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: default_session_backend(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// Seconds after startup before the readiness probe reports ready
    #[serde(default = "default_startup_delay")]
    pub startup_delay: u64,
}

fn default_startup_delay() -> u64 {
    3
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            startup_delay: default_startup_delay(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "ws-message-counter".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}

impl Settings {
    pub fn new() -> crate::error::Result<Self> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("websocket.heartbeat_interval", 30)?
            .set_default("websocket.graceful_shutdown_timeout", 10)?
            .set_default("broadcast.backend", "memory")?
            .set_default("redis.url", "redis://localhost:6379")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // SERVER__PORT, WEBSOCKET__HEARTBEAT_INTERVAL, BROADCAST__BACKEND, ...
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            // Flat names used by existing deployments
            .set_override_option(
                "websocket.heartbeat_interval",
                env::var("WEBSOCKET_HEARTBEAT_INTERVAL").ok(),
            )?
            .set_override_option(
                "websocket.graceful_shutdown_timeout",
                env::var("GRACEFUL_SHUTDOWN_TIMEOUT").ok(),
            )?
            .set_override_option(
                "health.startup_delay",
                env::var("HEALTH_CHECK_STARTUP_DELAY").ok(),
            )?
            .set_override_option("redis.url", env::var("REDIS_URL").ok())?
            .set_override_option("logging.level", env::var("LOG_LEVEL").ok())?
            .set_override_option("logging.format", env::var("LOG_FORMAT").ok())?;

        Ok(builder.build()?.try_deserialize()?)
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let settings = Settings::default();
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.websocket.heartbeat_interval, 30);
        assert_eq!(settings.websocket.graceful_shutdown_timeout, 10);
        assert_eq!(settings.websocket.group_name, "chat_all");
        assert_eq!(settings.broadcast.backend, "memory");
        assert_eq!(settings.health.startup_delay, 3);
        assert_eq!(settings.server_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn test_drain_timeout_is_capped() {
        let config = WebSocketConfig::default();
        assert_eq!(config.drain_timeout(), Duration::from_secs(5));

        let config = WebSocketConfig {
            graceful_shutdown_timeout: 4,
            ..Default::default()
        };
        assert_eq!(config.drain_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_drain_timeout_never_negative() {
        let config = WebSocketConfig {
            graceful_shutdown_timeout: 1,
            ..Default::default()
        };
        assert_eq!(config.drain_timeout(), Duration::ZERO);
    }

    #[test]
    fn test_durations() {
        let config = WebSocketConfig::default();
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.drain_poll_interval(), Duration::from_millis(100));
        assert_eq!(config.close_grace_period(), Duration::from_millis(500));
    }
}
