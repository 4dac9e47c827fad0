use axum::{routing::get, Router};

use crate::handlers::{self, MonitoringState};

pub fn create_monitoring_router(state: MonitoringState) -> Router {
    Router::new()
        .route("/metrics", get(handlers::metrics))
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .with_state(state)
}
