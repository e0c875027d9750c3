//! Liveness and readiness probes.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::Utc;
use serde::Serialize;

use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    /// Seconds since startup
    pub uptime: f64,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub ready: bool,
    pub shutting_down: bool,
    pub fabric: FabricStatus,
}

/// Broadcast fabric state, informational only
#[derive(Debug, Serialize)]
pub struct FabricStatus {
    pub backend: &'static str,
    pub connected: bool,
}

/// GET /healthz - liveness, always 200 while the process serves requests
pub async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now().to_rfc3339(),
        uptime: state.health.uptime().as_secs_f64(),
    })
}

/// GET /readyz - 503 during the startup delay and once shutdown has begun
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let ready = state.health.is_ready();
    let shutting_down = state.health.is_shutting_down();
    let fabric = &state.connections.fabric;

    let body = ReadinessResponse {
        status: if ready { "ready" } else { "not_ready" },
        timestamp: Utc::now().to_rfc3339(),
        ready,
        shutting_down,
        fabric: FabricStatus {
            backend: fabric.backend_type().as_str(),
            connected: fabric.is_connected(),
        },
    };

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(body))
}
