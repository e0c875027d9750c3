mod settings;

pub use settings::{
    BroadcastConfig, HealthConfig, LoggingConfig, OtelConfig, RedisConfig, ServerConfig,
    SessionConfig, Settings, WebSocketConfig,
};
