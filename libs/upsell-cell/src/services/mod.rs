pub mod addon;
pub mod events;
pub mod integration;
pub mod jobs;
pub mod scheduler;
pub mod variants;
pub mod worker;

pub use addon::AddonRecommender;
pub use events::UpsellEventLog;
pub use integration::UpsellBridge;
pub use jobs::UpsellJobStore;
pub use scheduler::{BookingConfirmed, UpsellConfig, UpsellScheduler};
pub use variants::VariantPicker;
pub use worker::UpsellWorker;
