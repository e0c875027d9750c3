//! API layer - HTTP probe and metrics handlers.

mod health;
mod metrics;
mod routes;

pub use health::{healthz, readyz, HealthResponse, ReadinessResponse};
pub use metrics::prometheus_metrics;
pub use routes::api_routes;
