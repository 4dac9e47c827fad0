pub mod dedup;
pub mod evolution;
pub mod outbound;

pub use dedup::MessageDeduper;
pub use evolution::EvolutionClient;
pub use outbound::OutboundMessenger;
