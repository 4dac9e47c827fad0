use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use conversation_cell::{ConversationContext, UpsellIntegration};

use crate::services::scheduler::{BookingConfirmed, UpsellScheduler};

/// Adapts the scheduler to the conversation controller's hook trait.
pub struct UpsellBridge {
    scheduler: Arc<UpsellScheduler>,
}

impl UpsellBridge {
    pub fn new(scheduler: Arc<UpsellScheduler>) -> Self {
        Self { scheduler }
    }

    fn booking_from(ctx: &ConversationContext) -> BookingConfirmed {
        BookingConfirmed {
            tenant: ctx.tenant.clone(),
            conversation_id: ctx.conversation_id.to_string(),
            phone: ctx.phone.clone(),
            appointment_id: ctx
                .vars
                .get("appointment_id")
                .and_then(|v| v.as_i64())
                .unwrap_or(0),
            primary_service_id: ctx.slots.service_id.unwrap_or(0),
        }
    }
}

#[async_trait]
impl UpsellIntegration for UpsellBridge {
    async fn on_booking_confirmed(&self, ctx: &ConversationContext) {
        let booking = Self::booking_from(ctx);
        if let Err(e) = self.scheduler.on_booking_confirmed(booking, None).await {
            // The booking itself already succeeded; the offer is best-effort.
            warn!("Upsell hook failed: {}", e);
        }
    }

    async fn interpret_reply(&self, ctx: &ConversationContext, text: &str) -> Option<String> {
        let booking = Self::booking_from(ctx);
        match self.scheduler.interpret_reply(&booking, text).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Upsell reply interpretation failed: {}", e);
                None
            }
        }
    }
}
