//! Prometheus metrics for the message counter service.
//!
//! The connection handler, heartbeat broadcaster and shutdown sequence update
//! these at the points where the corresponding lifecycle events happen:
//! - Connection metrics (active connections, connection duration)
//! - Message metrics (accepted messages)
//! - Error metrics (labelled by failure kind)
//! - Broadcast metrics (heartbeat rounds, published events)
//! - Shutdown metrics (time spent in the shutdown sequence)

mod helpers;

pub use helpers::{
    encode_metrics, BroadcastMetrics, ConnectionMetrics, ErrorKind, ErrorMetrics,
    HeartbeatMetrics, MessageMetrics, ShutdownMetrics,
};

use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, Gauge, Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "websocket";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Number of active WebSocket connections
    pub static ref ACTIVE_CONNECTIONS: IntGauge = register_int_gauge!(
        format!("{}_active_connections", METRIC_PREFIX),
        "Number of active WebSocket connections"
    ).unwrap();

    /// WebSocket connection duration
    pub static ref CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_connection_duration_seconds", METRIC_PREFIX),
        "WebSocket connection duration",
        vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0, 3600.0]
    ).unwrap();

    // ============================================================================
    // Message Metrics
    // ============================================================================

    /// Total counted messages
    pub static ref MESSAGES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_total", METRIC_PREFIX),
        "Total number of WebSocket messages processed"
    ).unwrap();

    /// Errors by failure kind
    pub static ref ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_errors_total", METRIC_PREFIX),
        "Total number of WebSocket errors",
        &["error_type"]
    ).unwrap();

    // ============================================================================
    // Broadcast Metrics
    // ============================================================================

    /// Events published to broadcast groups, by event kind
    pub static ref BROADCAST_EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_broadcast_events_total", METRIC_PREFIX),
        "Total events published to broadcast groups",
        &["kind"]
    ).unwrap();

    /// Duration of one heartbeat round in milliseconds
    pub static ref HEARTBEAT_DURATION_MS: Histogram = register_histogram!(
        format!("{}_heartbeat_duration_ms", METRIC_PREFIX),
        "Heartbeat round duration in milliseconds",
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0]
    ).unwrap();

    // ============================================================================
    // Shutdown Metrics
    // ============================================================================

    /// Time taken for graceful shutdown
    pub static ref SHUTDOWN_TIME: Gauge = register_gauge!(
        format!("{}_shutdown_time_seconds", METRIC_PREFIX),
        "Time taken for graceful shutdown"
    ).unwrap();
}
