//! Broadcast fabric types

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Client-facing heartbeat payload, forwarded verbatim by every connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    #[serde(rename = "type")]
    pub kind: String,
    /// ISO-8601 UTC timestamp
    pub ts: String,
}

impl HeartbeatPayload {
    pub fn now() -> Self {
        Self {
            kind: "heartbeat".to_string(),
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
        }
    }
}

/// Event fanned out to the members of a broadcast group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BroadcastEvent {
    Heartbeat { message: HeartbeatPayload },
    /// Carries no payload; receipt starts the connection's drain sequence
    Shutdown,
}

impl BroadcastEvent {
    pub fn heartbeat() -> Self {
        Self::Heartbeat {
            message: HeartbeatPayload::now(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Heartbeat { .. } => "heartbeat",
            Self::Shutdown => "shutdown",
        }
    }
}

/// A connection's membership handle: the id used for `leave` and the
/// sending half of the connection's event channel.
#[derive(Debug, Clone)]
pub struct GroupMember {
    pub id: Uuid,
    sender: mpsc::Sender<BroadcastEvent>,
}

impl GroupMember {
    /// Create a member handle and the receiver its connection reads events from
    pub fn channel(id: Uuid, capacity: usize) -> (Self, mpsc::Receiver<BroadcastEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { id, sender }, receiver)
    }

    pub async fn deliver(
        &self,
        event: BroadcastEvent,
    ) -> Result<(), mpsc::error::SendError<BroadcastEvent>> {
        self.sender.send(event).await
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Outcome of one publish
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    /// Members the event was handed to (for Redis: nodes that received it)
    pub delivered: usize,
    /// Members whose delivery failed or timed out
    pub failed: usize,
}

/// Backend type for the broadcast fabric
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FabricBackend {
    /// In-process groups, single node
    Memory,
    /// Redis pub/sub relay between nodes
    Redis,
    /// No fabric; operations are logged no-ops
    Disabled,
}

impl FabricBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            FabricBackend::Memory => "memory",
            FabricBackend::Redis => "redis",
            FabricBackend::Disabled => "none",
        }
    }
}

/// Error type for broadcast fabric operations
#[derive(Debug, Error)]
pub enum FabricError {
    #[error("Broadcast fabric unavailable: {0}")]
    Unavailable(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_heartbeat_payload_shape() {
        let payload = HeartbeatPayload::now();
        let value = serde_json::to_value(&payload).unwrap();

        assert_eq!(value["type"], "heartbeat");
        let ts = value["ts"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
    }

    #[test]
    fn test_event_wire_format() {
        let value = serde_json::to_value(BroadcastEvent::Shutdown).unwrap();
        assert_eq!(value, json!({"kind": "shutdown"}));

        let event = BroadcastEvent::Heartbeat {
            message: HeartbeatPayload {
                kind: "heartbeat".to_string(),
                ts: "2024-01-01T00:00:00Z".to_string(),
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"kind": "heartbeat", "message": {"type": "heartbeat", "ts": "2024-01-01T00:00:00Z"}})
        );
        assert_eq!(event.kind(), "heartbeat");
    }

    #[tokio::test]
    async fn test_member_channel_delivers() {
        let (member, mut rx) = GroupMember::channel(Uuid::new_v4(), 4);
        member.deliver(BroadcastEvent::Shutdown).await.unwrap();
        assert_eq!(rx.recv().await, Some(BroadcastEvent::Shutdown));

        drop(rx);
        assert!(member.is_closed());
    }
}
