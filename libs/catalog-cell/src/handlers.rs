use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;

use shared_models::error::AppError;

use crate::error::CatalogError;
use crate::models::{DiffReport, SyncOutcome};
use crate::services::{CatalogDiffService, CatalogSyncService};

#[derive(Clone)]
pub struct CatalogHandlersState {
    pub sync: Arc<CatalogSyncService>,
    pub diff: Arc<CatalogDiffService>,
    pub tenant_default: String,
}

#[derive(Debug, Deserialize)]
pub struct SyncParams {
    pub tenant: Option<String>,
    pub since: Option<String>,
}

#[instrument(skip(state))]
pub async fn trigger_sync(
    State(state): State<CatalogHandlersState>,
    Query(params): Query<SyncParams>,
) -> Result<Json<SyncOutcome>, AppError> {
    let tenant = params.tenant.unwrap_or_else(|| state.tenant_default.clone());
    let outcome = state
        .sync
        .trigger_full_sync(&tenant, params.since)
        .await
        .map_err(map_catalog_error)?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct DiffParams {
    pub tenant: Option<String>,
}

#[instrument(skip(state))]
pub async fn diff_report(
    State(state): State<CatalogHandlersState>,
    Query(params): Query<DiffParams>,
) -> Result<Json<DiffReport>, AppError> {
    let tenant = params.tenant.unwrap_or_else(|| state.tenant_default.clone());
    let report = state
        .diff
        .daily_diff_report(&tenant)
        .await
        .map_err(map_catalog_error)?;
    Ok(Json(report))
}

fn map_catalog_error(e: CatalogError) -> AppError {
    match e {
        CatalogError::SyncInProgress(tenant) => {
            AppError::Conflict(format!("sync in progress for {}", tenant))
        }
        CatalogError::Provider(inner) => AppError::ExternalService(inner.to_string()),
        other => AppError::Internal(other.to_string()),
    }
}
