use async_trait::async_trait;

use crate::models::ConversationContext;

/// Seam between the conversation controller and the upsell scheduler. The
/// scheduler lives in its own cell; the controller only knows this trait.
#[async_trait]
pub trait UpsellIntegration: Send + Sync {
    /// Fired once per entry into the booking-confirmed state.
    async fn on_booking_confirmed(&self, ctx: &ConversationContext);

    /// Gives the scheduler first right of refusal on an inbound text after
    /// an offer was shown. `Some(reply)` intercepts the message; `None`
    /// lets the normal flow run.
    async fn interpret_reply(&self, ctx: &ConversationContext, text: &str) -> Option<String>;
}
