use axum::{routing::get, Router};

use crate::server::AppState;

use super::health::{healthz, readyz};
use super::metrics::prometheus_metrics;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Probes, with and without the trailing slash
        .route("/healthz/", get(healthz))
        .route("/healthz", get(healthz))
        .route("/readyz/", get(readyz))
        .route("/readyz", get(readyz))
        // Prometheus
        .route("/metrics", get(prometheus_metrics))
        .route("/metrics/", get(prometheus_metrics))
}
