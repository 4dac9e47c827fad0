use axum::{
    extract::{Query, State},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::instrument;

use shared_models::error::AppError;

use crate::models::{CopyVariant, JobStatus, PositionVariant, Variant};
use crate::services::scheduler::{BookingConfirmed, UpsellScheduler};

#[derive(Clone)]
pub struct UpsellHandlersState {
    pub scheduler: Arc<UpsellScheduler>,
    pub tenant_default: String,
}

#[derive(Debug, Deserialize)]
pub struct MetricsParams {
    pub tenant: Option<String>,
}

#[instrument(skip(state))]
pub async fn upsell_metrics(
    State(state): State<UpsellHandlersState>,
    Query(params): Query<MetricsParams>,
) -> Result<Json<Value>, AppError> {
    let tenant = params.tenant.unwrap_or_else(|| state.tenant_default.clone());
    let counters = state
        .scheduler
        .events()
        .counters(&tenant)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(json!({ "tenant": tenant, "counters": counters })))
}

#[instrument(skip(state))]
pub async fn upsell_health(
    State(state): State<UpsellHandlersState>,
) -> Result<Json<Value>, AppError> {
    let jobs = state
        .scheduler
        .jobs()
        .all()
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    let now = Utc::now();
    let pending = jobs.iter().filter(|j| j.status == JobStatus::Pending).count();
    let overdue = jobs
        .iter()
        .filter(|j| j.status == JobStatus::Pending && j.scheduled_for <= now)
        .count();
    let failed = jobs.iter().filter(|j| j.status == JobStatus::Failed).count();
    let completed = jobs.iter().filter(|j| j.status == JobStatus::Completed).count();

    Ok(Json(json!({
        "jobs_total": jobs.len(),
        "pending": pending,
        "overdue": overdue,
        "failed": failed,
        "completed": completed,
    })))
}

#[derive(Debug, Deserialize)]
pub struct TestUpsellRequest {
    pub phone: String,
    pub tenant: Option<String>,
    pub conversation_id: Option<String>,
    pub primary_service_id: i64,
    #[serde(default)]
    pub appointment_id: i64,
    /// "A" or "B"
    pub copy: Option<String>,
    /// "IMMEDIATE" or "DELAY10"
    pub position: Option<String>,
}

/// Forces a synthetic upsell with a pinned variant; admin test traffic only.
#[instrument(skip(state, body))]
pub async fn test_upsell(
    State(state): State<UpsellHandlersState>,
    Json(body): Json<TestUpsellRequest>,
) -> Result<Json<Value>, AppError> {
    let copy = match body.copy.as_deref() {
        Some("B") | Some("b") => CopyVariant::B,
        _ => CopyVariant::A,
    };
    let position = match body.position.as_deref() {
        Some("DELAY10") | Some("delay10") => PositionVariant::Delay10,
        _ => PositionVariant::Immediate,
    };

    let booking = BookingConfirmed {
        tenant: body.tenant.unwrap_or_else(|| state.tenant_default.clone()),
        conversation_id: body
            .conversation_id
            .unwrap_or_else(|| format!("test-{}", Utc::now().timestamp_millis())),
        phone: body.phone,
        appointment_id: body.appointment_id,
        primary_service_id: body.primary_service_id,
    };

    let outcome = state
        .scheduler
        .on_booking_confirmed(booking, Some(Variant { copy, position }))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(json!({ "outcome": outcome.as_str() })))
}
