use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use shared_storage::KeyValueStore;

use crate::error::UpsellError;
use crate::models::{UpsellConversationState, UpsellEvent, UpsellEventKind};

/// Append-only upsell event log plus the per-conversation dedupe state.
///
/// Layout:
/// - `upsell:events:{tenant}`  — list of serialized [`UpsellEvent`]
/// - `upsell:conv:{conversation_id}` — [`UpsellConversationState`] blob
/// - `upsell:shown:{conversation_id}` — set-once marker behind `has_shown`
pub struct UpsellEventLog {
    store: Arc<dyn KeyValueStore>,
}

impl UpsellEventLog {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn append(&self, event: &UpsellEvent) -> Result<(), UpsellError> {
        let raw = serde_json::to_string(event)?;
        self.store
            .push_back(&format!("upsell:events:{}", event.tenant), &raw)
            .await?;
        metrics::counter!("upsell_events_total", "event" => event.event.as_str()).increment(1);

        let mut state = self.conversation_state(&event.conversation_id).await?;
        if event.event == UpsellEventKind::Shown {
            state.has_shown = true;
        }
        state.last_event = Some(event.event);
        state.last_event_at = Some(Utc::now());
        if event.addon_id.is_some() {
            state.last_addon_id = event.addon_id;
        }
        if let (Some(copy), Some(position)) = (event.variant_copy, event.variant_position) {
            state.last_variant = Some(crate::models::Variant { copy, position });
        }
        self.store
            .set(
                &format!("upsell:conv:{}", event.conversation_id),
                &serde_json::to_string(&state)?,
                None,
            )
            .await?;

        debug!("Upsell event {} appended", event.event.as_str());
        Ok(())
    }

    pub async fn conversation_state(
        &self,
        conversation_id: &str,
    ) -> Result<UpsellConversationState, UpsellError> {
        match self
            .store
            .get(&format!("upsell:conv:{}", conversation_id))
            .await?
        {
            Some(raw) => Ok(serde_json::from_str(&raw).unwrap_or_default()),
            None => Ok(UpsellConversationState::default()),
        }
    }

    /// Atomically claims the one allowed "shown" for a conversation.
    /// Returns false when some other path already claimed it.
    pub async fn claim_shown(&self, conversation_id: &str) -> Result<bool, UpsellError> {
        Ok(self
            .store
            .set_nx(&format!("upsell:shown:{}", conversation_id), "1", None)
            .await?)
    }

    /// Stores the offered add-on snapshot on the conversation state.
    pub async fn remember_addon(
        &self,
        conversation_id: &str,
        addon: &crate::models::Addon,
    ) -> Result<(), UpsellError> {
        let mut state = self.conversation_state(conversation_id).await?;
        state.last_addon_id = Some(addon.service_id);
        state.last_addon = Some(addon.clone());
        self.store
            .set(
                &format!("upsell:conv:{}", conversation_id),
                &serde_json::to_string(&state)?,
                None,
            )
            .await?;
        Ok(())
    }

    /// Undoes a claim whose delivery failed, so a retry may send again.
    pub async fn release_shown(&self, conversation_id: &str) -> Result<(), UpsellError> {
        self.store
            .delete(&format!("upsell:shown:{}", conversation_id))
            .await?;
        Ok(())
    }

    pub async fn events_for_tenant(&self, tenant: &str) -> Result<Vec<UpsellEvent>, UpsellError> {
        let rows = self
            .store
            .list_all(&format!("upsell:events:{}", tenant))
            .await?;
        let mut events = Vec::with_capacity(rows.len());
        for raw in rows {
            if let Ok(event) = serde_json::from_str(&raw) {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Counters per event kind, for the admin metrics endpoint.
    pub async fn counters(&self, tenant: &str) -> Result<HashMap<String, u64>, UpsellError> {
        let mut counters: HashMap<String, u64> = HashMap::new();
        for event in self.events_for_tenant(tenant).await? {
            *counters.entry(event.event.as_str().to_string()).or_insert(0) += 1;
        }
        Ok(counters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CopyVariant, PositionVariant};
    use shared_storage::MemoryStore;

    fn event(kind: UpsellEventKind) -> UpsellEvent {
        UpsellEvent {
            tenant: "default".to_string(),
            conversation_id: "conv-1".to_string(),
            phone: "5511999999999".to_string(),
            event: kind,
            addon_id: Some(7),
            addon_price: Some(35.0),
            variant_copy: Some(CopyVariant::A),
            variant_position: Some(PositionVariant::Immediate),
            appointment_id: 99,
            primary_service_id: 1,
            processing_ms: Some(12),
            error_message: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn shown_event_sets_has_shown() {
        let log = UpsellEventLog::new(Arc::new(MemoryStore::new()));
        assert!(!log.conversation_state("conv-1").await.unwrap().has_shown);

        log.append(&event(UpsellEventKind::Shown)).await.unwrap();

        let state = log.conversation_state("conv-1").await.unwrap();
        assert!(state.has_shown);
        assert_eq!(state.last_event, Some(UpsellEventKind::Shown));
        assert_eq!(state.last_addon_id, Some(7));
    }

    #[tokio::test]
    async fn claim_shown_is_at_most_once() {
        let log = UpsellEventLog::new(Arc::new(MemoryStore::new()));
        assert!(log.claim_shown("conv-1").await.unwrap());
        assert!(!log.claim_shown("conv-1").await.unwrap());
        assert!(log.claim_shown("conv-2").await.unwrap());
    }

    #[tokio::test]
    async fn counters_aggregate_by_kind() {
        let log = UpsellEventLog::new(Arc::new(MemoryStore::new()));
        log.append(&event(UpsellEventKind::Shown)).await.unwrap();
        log.append(&event(UpsellEventKind::Accepted)).await.unwrap();
        log.append(&event(UpsellEventKind::Accepted)).await.unwrap();

        let counters = log.counters("default").await.unwrap();
        assert_eq!(counters.get("shown"), Some(&1));
        assert_eq!(counters.get("accepted"), Some(&2));
    }
}
