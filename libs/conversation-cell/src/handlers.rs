use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, instrument};

use shared_models::error::AppError;

use crate::services::{ConversationController, HandoffService};

#[derive(Clone)]
pub struct ConversationHandlersState {
    pub controller: Arc<ConversationController>,
    pub handoff: Arc<HandoffService>,
    pub tenant_default: String,
}

#[derive(Debug, Deserialize)]
pub struct TenantParams {
    pub tenant: Option<String>,
}

impl TenantParams {
    fn resolve(&self, default: &str) -> String {
        self.tenant.clone().unwrap_or_else(|| default.to_string())
    }
}

#[instrument(skip(state))]
pub async fn get_state(
    State(state): State<ConversationHandlersState>,
    Path(phone): Path<String>,
    Query(params): Query<TenantParams>,
) -> Result<Json<Value>, AppError> {
    let tenant = params.resolve(&state.tenant_default);
    let context = state
        .controller
        .admin_get_context(&tenant, &phone)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .ok_or_else(|| AppError::NotFound(format!("no conversation for {}", phone)))?;
    Ok(Json(context))
}

#[instrument(skip(state, body))]
pub async fn set_state(
    State(state): State<ConversationHandlersState>,
    Path(phone): Path<String>,
    Query(params): Query<TenantParams>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, AppError> {
    let tenant = params.resolve(&state.tenant_default);
    state
        .controller
        .admin_set_context(&tenant, &phone, body)
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    info!("Conversation context overwritten via admin API");
    Ok(Json(json!({ "updated": true })))
}

#[instrument(skip(state))]
pub async fn list_states(
    State(state): State<ConversationHandlersState>,
    Query(params): Query<TenantParams>,
) -> Result<Json<Value>, AppError> {
    let tenant = params.resolve(&state.tenant_default);
    let phones = state
        .controller
        .admin_list_phones(&tenant)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(json!({ "tenant": tenant, "phones": phones })))
}

#[instrument(skip(state))]
pub async fn activate_handoff(
    State(state): State<ConversationHandlersState>,
    Path(phone): Path<String>,
    Query(params): Query<TenantParams>,
) -> Result<Json<Value>, AppError> {
    let tenant = params.resolve(&state.tenant_default);
    state
        .handoff
        .activate(&tenant, &phone)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(json!({ "handoff": true })))
}

#[instrument(skip(state))]
pub async fn clear_handoff(
    State(state): State<ConversationHandlersState>,
    Path(phone): Path<String>,
    Query(params): Query<TenantParams>,
) -> Result<Json<Value>, AppError> {
    let tenant = params.resolve(&state.tenant_default);
    state
        .handoff
        .clear(&tenant, &phone)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(json!({ "handoff": false })))
}
