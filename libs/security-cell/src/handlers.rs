use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

use shared_models::error::AppError;

use crate::services::{AdminGate, WebhookVerifier};

#[derive(Clone)]
pub struct SecurityHandlersState {
    pub gate: Arc<AdminGate>,
    pub verifier: Arc<WebhookVerifier>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct RotateSecretRequest {
    pub new_secret: String,
}

#[instrument(skip(state, body))]
pub async fn login(
    State(state): State<SecurityHandlersState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let token = state.gate.login(&body.token)?;
    info!("Admin login succeeded");
    Ok(Json(LoginResponse { token }))
}

#[instrument(skip(state, body))]
pub async fn rotate_secret(
    State(state): State<SecurityHandlersState>,
    Json(body): Json<RotateSecretRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    state
        .verifier
        .rotate(&body.new_secret)
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    info!("HMAC secret rotated via admin API");
    Ok(Json(serde_json::json!({ "rotated": true })))
}
