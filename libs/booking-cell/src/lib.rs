pub mod error;
pub mod models;
pub mod services;

pub use error::BookingError;
pub use models::{
    AppointmentAttempt, AppointmentResponse, AttemptStatus, AvailabilityResult,
    CreateAppointmentRequest, ProviderClient, ProviderService, ServicesPage,
};
pub use services::{
    audit::AppointmentAuditLog,
    availability::AvailabilityService,
    booking::BookingService,
    provider::BookingProvider,
    trinks::TrinksClient,
};
