use async_trait::async_trait;

use crate::error::ChannelError;

/// Outbound text channel. No ordering guarantees across phones.
#[async_trait]
pub trait OutboundMessenger: Send + Sync {
    async fn send_text(&self, phone: &str, text: &str) -> Result<(), ChannelError>;
}
