use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use shared_utils::mask::mask_phone;

use crate::error::BookingError;
use crate::models::{
    AppointmentAttempt, AppointmentResponse, AttemptStatus, CreateAppointmentRequest,
};
use crate::services::audit::AppointmentAuditLog;
use crate::services::provider::BookingProvider;

/// Creates confirmed appointments with an idempotency key so a replayed
/// webhook or a retried handler never books twice.
pub struct BookingService {
    provider: Arc<dyn BookingProvider>,
    audit: Arc<AppointmentAuditLog>,
}

impl BookingService {
    pub fn new(provider: Arc<dyn BookingProvider>, audit: Arc<AppointmentAuditLog>) -> Self {
        Self { provider, audit }
    }

    /// `hash(client_id, service_id, start_iso, professional_id | "any")`.
    pub fn idempotency_key(
        client_id: i64,
        service_id: i64,
        start_iso: &str,
        professional_id: Option<i64>,
    ) -> String {
        let professional = professional_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "any".to_string());
        let input = format!("{}:{}:{}:{}", client_id, service_id, start_iso, professional);
        hex::encode(Sha256::digest(input.as_bytes()))
    }

    #[instrument(skip_all, fields(tenant = %tenant, phone = %mask_phone(phone)))]
    pub async fn create_confirmed(
        &self,
        tenant: &str,
        phone: &str,
        request: CreateAppointmentRequest,
    ) -> Result<AppointmentResponse, BookingError> {
        if !request.confirmed {
            return Err(BookingError::UnconfirmedAppointment);
        }

        let key = Self::idempotency_key(
            request.client_id,
            request.service_id,
            &request.start_iso,
            request.professional_id,
        );

        // A replayed booking returns the original result without touching
        // the provider again.
        if let Some(previous) = self.audit.find_by_idempotency_key(&key).await? {
            if previous.status == AttemptStatus::Success {
                if let Some(response) = previous.response_payload {
                    info!("Duplicate booking collapsed onto idempotency key");
                    return Ok(serde_json::from_value(response)?);
                }
            }
        }

        let request_payload = serde_json::to_value(&request)?;
        match self.provider.create_appointment(&request).await {
            Ok(response) => {
                metrics::counter!("bookings_total").increment(1);
                self.audit
                    .record(&AppointmentAttempt {
                        tenant: tenant.to_string(),
                        phone: phone.to_string(),
                        service_id: request.service_id,
                        professional_id: request.professional_id,
                        start_iso: request.start_iso.clone(),
                        idempotency_key: key,
                        request_payload,
                        response_payload: Some(serde_json::to_value(&response)?),
                        provider_appointment_id: Some(response.id),
                        status: AttemptStatus::Success,
                        created_at: Utc::now(),
                    })
                    .await?;
                Ok(response)
            }
            Err(e) => {
                warn!("Provider rejected booking: {}", e);
                self.audit
                    .record(&AppointmentAttempt {
                        tenant: tenant.to_string(),
                        phone: phone.to_string(),
                        service_id: request.service_id,
                        professional_id: request.professional_id,
                        start_iso: request.start_iso.clone(),
                        idempotency_key: key,
                        request_payload,
                        response_payload: None,
                        provider_appointment_id: None,
                        status: AttemptStatus::Error,
                        created_at: Utc::now(),
                    })
                    .await?;
                Err(e)
            }
        }
    }
}
