use axum::{extract::State, http::StatusCode, Json};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

use security_cell::CircuitBreakerRegistry;
use shared_storage::KeyValueStore;

#[derive(Clone)]
pub struct MonitoringState {
    pub prometheus: PrometheusHandle,
    pub store: Arc<dyn KeyValueStore>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub started_at: Instant,
}

/// Prometheus text exposition.
pub async fn metrics(State(state): State<MonitoringState>) -> String {
    state.prometheus.render()
}

/// Liveness: the process is up, plus the breaker states for a quick read on
/// the external dependencies.
pub async fn health(State(state): State<MonitoringState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "breakers": state.breakers.snapshots(),
    }))
}

/// Readiness: the backing store answers.
pub async fn ready(State(state): State<MonitoringState>) -> Result<Json<Value>, StatusCode> {
    match state.store.get("readiness:probe").await {
        Ok(_) => Ok(Json(json!({ "ready": true }))),
        Err(_) => Err(StatusCode::SERVICE_UNAVAILABLE),
    }
}
