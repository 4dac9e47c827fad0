use async_trait::async_trait;
use reqwest::{header::HeaderValue, Client, StatusCode};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

use security_cell::CircuitBreaker;
use shared_config::AppConfig;
use shared_utils::mask::mask_phone;

use crate::error::ChannelError;
use crate::services::outbound::OutboundMessenger;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_millis(250);

/// Send-text adapter for the Evolution WhatsApp gateway, shielded by the
/// evolution circuit breaker and retried with exponential backoff.
pub struct EvolutionClient {
    client: Client,
    base_url: String,
    api_key: String,
    instance: String,
    breaker: Arc<CircuitBreaker>,
}

impl EvolutionClient {
    pub fn new(config: &AppConfig, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: config.evolution_base_url.clone(),
            api_key: config.evolution_api_key.clone(),
            instance: config.evolution_instance.clone(),
            breaker,
        }
    }

    async fn send_once(&self, phone: &str, text: &str) -> Result<(), ChannelError> {
        let url = format!("{}/message/sendText/{}", self.base_url, self.instance);
        let body = json!({
            "number": phone,
            "text": text,
        });

        let mut request = self.client.post(&url).json(&body);
        if let Ok(value) = HeaderValue::from_str(&self.api_key) {
            request = request.header("apikey", value);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
            // A 4xx will not get better on retry.
            return Err(ChannelError::SendRejected {
                status: status.as_u16(),
                body,
            });
        }
        Err(ChannelError::RetriesExhausted(format!("{}: {}", status, body)))
    }
}

#[async_trait]
impl OutboundMessenger for EvolutionClient {
    #[instrument(skip_all, fields(phone = %mask_phone(phone)))]
    async fn send_text(&self, phone: &str, text: &str) -> Result<(), ChannelError> {
        if self.breaker.try_acquire().is_err() {
            warn!("evolution breaker open, dropping send attempt");
            return Err(ChannelError::CircuitOpen("evolution".to_string()));
        }

        let mut last_error: Option<ChannelError> = None;
        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(BASE_BACKOFF * 2u32.pow(attempt - 1)).await;
            }
            match self.send_once(phone, text).await {
                Ok(()) => {
                    self.breaker.record(true);
                    debug!("Message delivered on attempt {}", attempt + 1);
                    return Ok(());
                }
                Err(ChannelError::SendRejected { status, body }) => {
                    self.breaker.record(true);
                    return Err(ChannelError::SendRejected { status, body });
                }
                Err(e) => {
                    warn!("Send attempt {} failed: {}", attempt + 1, e);
                    last_error = Some(e);
                }
            }
        }

        self.breaker.record(false);
        error!("Message send exhausted {} retries", MAX_RETRIES);
        Err(last_error
            .unwrap_or_else(|| ChannelError::RetriesExhausted("unknown".to_string())))
    }
}
