//! Broadcast fabric
//!
//! Named-group publish/subscribe used to fan heartbeats and the shutdown
//! notice out to every open connection. Connections join the default group
//! right after accept and leave it right before they are considered closed.

mod backoff;
mod factory;
mod local;
mod noop;
mod redis_fabric;
mod traits;
mod types;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use factory::create_fabric;
pub use local::LocalBroadcast;
pub use noop::NoopBroadcast;
pub use redis_fabric::{Envelope, RedisBroadcast, RedisRelay};
pub use traits::BroadcastFabric;
pub use types::{
    BroadcastEvent, FabricBackend, FabricError, GroupMember, HeartbeatPayload, PublishReport,
};
