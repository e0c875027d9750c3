//! Background tasks

mod heartbeat;

pub use heartbeat::{HeartbeatService, HeartbeatTask, DEFAULT_STOP_TIMEOUT};
