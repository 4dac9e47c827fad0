use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::BookingError;
use crate::models::{
    AppointmentResponse, AvailabilityResult, CreateAppointmentRequest, ProviderClient,
    ServicesPage,
};

/// The capabilities the core needs from the booking provider. `TrinksClient`
/// is the production implementation; tests plug in stubs.
#[async_trait]
pub trait BookingProvider: Send + Sync {
    async fn get_services_page(
        &self,
        updated_since: Option<DateTime<Utc>>,
        page: u32,
        limit: u32,
    ) -> Result<ServicesPage, BookingError>;

    async fn validate_availability(
        &self,
        service_id: i64,
        professional_id: Option<i64>,
        start_iso: &str,
    ) -> Result<AvailabilityResult, BookingError>;

    async fn create_appointment(
        &self,
        request: &CreateAppointmentRequest,
    ) -> Result<AppointmentResponse, BookingError>;

    async fn find_client_by_phone(
        &self,
        phone: &str,
    ) -> Result<Option<ProviderClient>, BookingError>;

    async fn append_service_to_appointment(
        &self,
        appointment_id: i64,
        addon_service_id: i64,
    ) -> Result<(), BookingError>;
}
