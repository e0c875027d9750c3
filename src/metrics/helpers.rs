//! Metrics helper structs for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use super::{
    ACTIVE_CONNECTIONS, BROADCAST_EVENTS_TOTAL, CONNECTION_DURATION, ERRORS_TOTAL,
    HEARTBEAT_DURATION_MS, MESSAGES_TOTAL, SHUTDOWN_TIME,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Failure kinds used as the `error_type` label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connection,
    Disconnect,
    Decode,
    MessageProcessing,
    Heartbeat,
    Shutdown,
    Fabric,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection_error",
            ErrorKind::Disconnect => "disconnect_error",
            ErrorKind::Decode => "decode_error",
            ErrorKind::MessageProcessing => "message_processing_error",
            ErrorKind::Heartbeat => "heartbeat_error",
            ErrorKind::Shutdown => "shutdown_error",
            ErrorKind::Fabric => "fabric_error",
        }
    }
}

/// Helper struct for recording error metrics
pub struct ErrorMetrics;

impl ErrorMetrics {
    pub fn record(kind: ErrorKind) {
        ERRORS_TOTAL.with_label_values(&[kind.as_str()]).inc();
    }

    pub fn count(kind: ErrorKind) -> u64 {
        ERRORS_TOTAL.with_label_values(&[kind.as_str()]).get()
    }
}

/// Helper struct for connection lifecycle metrics
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_opened() {
        ACTIVE_CONNECTIONS.inc();
    }

    /// Record a closed connection and how long it was open
    pub fn record_closed(duration: Duration) {
        ACTIVE_CONNECTIONS.dec();
        CONNECTION_DURATION.observe(duration.as_secs_f64());
    }
}

/// Helper struct for recording message metrics
pub struct MessageMetrics;

impl MessageMetrics {
    pub fn record_accepted() {
        MESSAGES_TOTAL.inc();
    }

    pub fn total() -> u64 {
        MESSAGES_TOTAL.get()
    }
}

/// Helper struct for broadcast metrics
pub struct BroadcastMetrics;

impl BroadcastMetrics {
    /// Record an event published to a group
    pub fn record_published(kind: &str) {
        BROADCAST_EVENTS_TOTAL.with_label_values(&[kind]).inc();
    }
}

/// Helper struct for heartbeat metrics
pub struct HeartbeatMetrics;

impl HeartbeatMetrics {
    pub fn record_duration_ms(ms: u64) {
        HEARTBEAT_DURATION_MS.observe(ms as f64);
    }
}

/// Helper struct for shutdown metrics
pub struct ShutdownMetrics;

impl ShutdownMetrics {
    pub fn record_shutdown_time(duration: Duration) {
        SHUTDOWN_TIME.set(duration.as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_labels() {
        assert_eq!(ErrorKind::Connection.as_str(), "connection_error");
        assert_eq!(ErrorKind::Decode.as_str(), "decode_error");
        assert_eq!(ErrorKind::MessageProcessing.as_str(), "message_processing_error");
        assert_eq!(ErrorKind::Heartbeat.as_str(), "heartbeat_error");
    }

    #[test]
    fn test_error_metrics_increment() {
        let before = ErrorMetrics::count(ErrorKind::Shutdown);
        ErrorMetrics::record(ErrorKind::Shutdown);
        assert!(ErrorMetrics::count(ErrorKind::Shutdown) > before);
    }

    #[test]
    fn test_message_metrics() {
        let before = MessageMetrics::total();
        MessageMetrics::record_accepted();
        assert!(MessageMetrics::total() > before);
    }

    #[test]
    fn test_broadcast_and_heartbeat_metrics() {
        BroadcastMetrics::record_published("heartbeat");
        HeartbeatMetrics::record_duration_ms(12);
        ShutdownMetrics::record_shutdown_time(Duration::from_millis(250));
        // Just verify no panics
    }
}
