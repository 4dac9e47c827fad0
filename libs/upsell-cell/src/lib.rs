pub mod error;
pub mod handlers;
pub mod models;
pub mod services;

pub use error::UpsellError;
pub use models::{
    Addon, CopyVariant, JobStatus, PositionVariant, ScheduledUpsellJob, UpsellConversationState,
    UpsellEvent, UpsellEventKind, Variant,
};
pub use services::{
    AddonRecommender, BookingConfirmed, UpsellBridge, UpsellConfig, UpsellEventLog, UpsellJobStore,
    UpsellScheduler, UpsellWorker, VariantPicker,
};
