use serde::Serialize;

use crate::broadcast::HeartbeatPayload;

/// Reason attached to the goodbye sent when the server shuts down
pub const SHUTDOWN_REASON: &str = "server_shutdown";

/// Messages sent from server to client.
///
/// Each variant has its own JSON shape; none carries a type tag except the
/// heartbeat, which is forwarded exactly as published.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Count {
        count: u64,
        session_id: String,
        message: String,
    },
    Goodbye {
        bye: bool,
        total: u64,
    },
    ShutdownGoodbye {
        bye: bool,
        total: u64,
        reason: String,
        inflight_completed: bool,
    },
    Error {
        error: String,
        session_id: String,
    },
    Heartbeat(HeartbeatPayload),
}

impl ServerMessage {
    pub fn count(count: u64, session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Count {
            count,
            session_id: session_id.into(),
            message: message.into(),
        }
    }

    pub fn goodbye(total: u64) -> Self {
        Self::Goodbye { bye: true, total }
    }

    pub fn shutdown_goodbye(total: u64, inflight_completed: bool) -> Self {
        Self::ShutdownGoodbye {
            bye: true,
            total,
            reason: SHUTDOWN_REASON.to_string(),
            inflight_completed,
        }
    }

    pub fn error(error: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
            session_id: session_id.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Frames queued for a connection's writer task
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Message(ServerMessage),
    Close { code: u16, reason: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn to_value(msg: &ServerMessage) -> Value {
        serde_json::from_str(&msg.to_json().unwrap()).unwrap()
    }

    #[test]
    fn test_count_shape() {
        let msg = ServerMessage::count(1, "abc", "hello");
        assert_eq!(
            to_value(&msg),
            json!({"count": 1, "session_id": "abc", "message": "hello"})
        );
    }

    #[test]
    fn test_goodbye_shapes() {
        assert_eq!(
            to_value(&ServerMessage::goodbye(3)),
            json!({"bye": true, "total": 3})
        );
        assert_eq!(
            to_value(&ServerMessage::shutdown_goodbye(3, false)),
            json!({"bye": true, "total": 3, "reason": "server_shutdown", "inflight_completed": false})
        );
    }

    #[test]
    fn test_error_shape() {
        assert_eq!(
            to_value(&ServerMessage::error("Server is shutting down", "abc")),
            json!({"error": "Server is shutting down", "session_id": "abc"})
        );
    }

    #[test]
    fn test_heartbeat_forwarded_verbatim() {
        let payload = HeartbeatPayload {
            kind: "heartbeat".to_string(),
            ts: "2024-01-01T00:00:00+00:00".to_string(),
        };
        assert_eq!(
            to_value(&ServerMessage::Heartbeat(payload)),
            json!({"type": "heartbeat", "ts": "2024-01-01T00:00:00+00:00"})
        );
    }
}
