use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use channel_cell::{MessageDeduper, WebhookEnvelope};
use conversation_cell::ConversationController;
use security_cell::{RateDecision, RateLimitService, WebhookVerifier};
use shared_config::AppConfig;

#[derive(Clone)]
pub struct WebhookState {
    pub config: Arc<AppConfig>,
    pub verifier: Arc<WebhookVerifier>,
    pub rate_limiter: Arc<RateLimitService>,
    pub deduper: Arc<MessageDeduper>,
    pub controller: Arc<ConversationController>,
}

/// `POST /webhooks/messaging`. Always answers `200 {"received": true}` once
/// the security envelope passes; message processing continues in the
/// background so the gateway's delivery deadline is never at risk.
#[instrument(skip_all, fields(ip = %addr.ip()))]
pub async fn receive_webhook(
    State(state): State<WebhookState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match state.rate_limiter.check_ip(addr.ip()).await {
        Ok(RateDecision::Allowed) => {}
        Ok(_) => {
            return StatusCode::TOO_MANY_REQUESTS.into_response();
        }
        Err(e) => warn!("IP rate check failed, letting request through: {}", e),
    }

    let signature = match headers.get("x-signature").and_then(|v| v.to_str().ok()) {
        Some(value) => value,
        None => {
            metrics::counter!("hmac_invalid_total").increment(1);
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };
    if state.verifier.verify(&body, signature).is_err() {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let envelope: WebhookEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!("Malformed webhook body: {}", e);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let messages = envelope.extract_messages(&state.config.tenant_default);
    let mut accepted = 0usize;
    let mut limited = 0usize;

    for message in messages {
        match state.deduper.first_seen(&message.message_id).await {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                warn!("Dedup check failed, processing anyway: {}", e);
            }
        }

        match state.rate_limiter.check_phone(&message.phone).await {
            Ok(RateDecision::Allowed) => {}
            Ok(_) => {
                // Rate-limited messages are dropped, not queued.
                limited += 1;
                continue;
            }
            Err(e) => warn!("Phone rate check failed, letting message through: {}", e),
        }

        accepted += 1;
        let controller = state.controller.clone();
        tokio::spawn(async move {
            controller
                .process_message(
                    &message.tenant,
                    &message.phone,
                    &message.text,
                    message.display_name.as_deref(),
                )
                .await;
        });
    }

    if accepted == 0 && limited > 0 {
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }

    (StatusCode::OK, Json(json!({ "received": true }))).into_response()
}
