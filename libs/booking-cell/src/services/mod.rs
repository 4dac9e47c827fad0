pub mod audit;
pub mod availability;
pub mod booking;
pub mod provider;
pub mod trinks;

pub use audit::AppointmentAuditLog;
pub use availability::AvailabilityService;
pub use booking::BookingService;
pub use provider::BookingProvider;
pub use trinks::TrinksClient;
