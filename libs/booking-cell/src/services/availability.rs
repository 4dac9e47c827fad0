use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{instrument, warn};

use security_cell::CircuitBreaker;

use crate::error::BookingError;
use crate::models::AvailabilityResult;
use crate::services::provider::BookingProvider;

/// Availability validation in front of the provider, shielded by the trinks
/// circuit breaker.
///
/// Failure policy: an explicit "no" from the provider is a hard `ok=false`;
/// an unreachable provider (breaker open, timeout, 5xx) degrades to
/// `ok=true, confidence="categorical"` so the conversation can proceed to a
/// manual confirmation instead of dead-ending.
pub struct AvailabilityService {
    provider: Arc<dyn BookingProvider>,
    breaker: Arc<CircuitBreaker>,
}

impl AvailabilityService {
    pub fn new(provider: Arc<dyn BookingProvider>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { provider, breaker }
    }

    #[instrument(skip(self))]
    pub async fn validate(
        &self,
        service_id: i64,
        professional_id: Option<i64>,
        start_iso: &str,
    ) -> Result<AvailabilityResult, BookingError> {
        // A slot in the past can be rejected without asking the provider.
        if let Some(start) = parse_start(start_iso) {
            if start < Utc::now() {
                return Ok(AvailabilityResult::unavailable("past", Vec::new()));
            }
        }

        if self.breaker.try_acquire().is_err() {
            warn!("trinks breaker open, returning categorical availability");
            return Ok(AvailabilityResult::categorical());
        }

        match self
            .provider
            .validate_availability(service_id, professional_id, start_iso)
            .await
        {
            Ok(result) => {
                self.breaker.record(true);
                Ok(result)
            }
            Err(BookingError::ProviderRejected { status, body }) => {
                // The provider answered and said no; that is a definite
                // refusal, not an outage.
                self.breaker.record(true);
                warn!("Provider rejected validation ({}): {}", status, body);
                Ok(AvailabilityResult::unavailable("rejected", Vec::new()))
            }
            Err(e) => {
                self.breaker.record(false);
                warn!("trinks unreachable during validation: {}", e);
                Ok(AvailabilityResult::categorical())
            }
        }
    }
}

fn parse_start(start_iso: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(start_iso)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
