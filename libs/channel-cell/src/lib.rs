pub mod error;
pub mod models;
pub mod services;

pub use error::ChannelError;
pub use models::{InboundMessage, WebhookEnvelope};
pub use services::{
    dedup::MessageDeduper, evolution::EvolutionClient, outbound::OutboundMessenger,
};
