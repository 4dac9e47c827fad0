// =====================================================================================
// MONITORING CELL - PROMETHEUS EXPOSITION & LIVENESS
// =====================================================================================

pub mod handlers;
pub mod router;

pub use handlers::MonitoringState;
pub use router::create_monitoring_router;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::warn;

/// Installs the global Prometheus recorder. Every `metrics::counter!` call
/// in the other cells lands here. Idempotent across tests: a second install
/// falls back to a detached handle.
pub fn install_prometheus_recorder() -> PrometheusHandle {
    let builder = PrometheusBuilder::new();
    match builder.install_recorder() {
        Ok(handle) => handle,
        Err(e) => {
            warn!("Prometheus recorder already installed: {}", e);
            PrometheusBuilder::new()
                .build_recorder()
                .handle()
        }
    }
}
