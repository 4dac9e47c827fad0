use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, instrument, warn};

use channel_cell::OutboundMessenger;
use shared_models::types::ConversationRef;
use shared_storage::KeyValueStore;
use shared_utils::mask::mask_phone;

use crate::error::ConversationError;
use crate::models::{
    ConversationContext, ConversationResponse, STATE_CONFIRMED, STATE_START, STATE_VALIDATE,
};
use crate::services::buffer::{BufferOutcome, FlushEvent, MessageBuffer};
use crate::services::classify::{DisambiguationService, QueryKind};
use crate::services::hooks::UpsellIntegration;
use crate::services::machine::StateMachine;
use crate::services::nlp::{Analyzer, Intent};
use shared_utils::normalize::normalize_text;

/// Owns `process_message`: buffering, context lifecycle, slot filling, state
/// machine execution, handoff freeze and the upsell hook. The context is
/// mutated only here, under the per-phone lock.
pub struct ConversationController {
    store: Arc<dyn KeyValueStore>,
    buffer: Arc<MessageBuffer>,
    machine: Arc<StateMachine>,
    analyzer: Arc<Analyzer>,
    classifier: Arc<DisambiguationService>,
    handoff: Arc<crate::services::handoff::HandoffService>,
    messenger: Arc<dyn OutboundMessenger>,
    upsell: Option<Arc<dyn UpsellIntegration>>,
    conversation_ttl: Duration,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    cache: Mutex<HashMap<String, ConversationContext>>,
}

impl ConversationController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        buffer: Arc<MessageBuffer>,
        machine: Arc<StateMachine>,
        analyzer: Arc<Analyzer>,
        classifier: Arc<DisambiguationService>,
        handoff: Arc<crate::services::handoff::HandoffService>,
        messenger: Arc<dyn OutboundMessenger>,
        conversation_ttl_hours: i64,
    ) -> Self {
        Self {
            store,
            buffer,
            machine,
            analyzer,
            classifier,
            handoff,
            messenger,
            upsell: None,
            conversation_ttl: Duration::from_secs((conversation_ttl_hours.max(1) as u64) * 3600),
            locks: Mutex::new(HashMap::new()),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_upsell(&mut self, upsell: Arc<dyn UpsellIntegration>) {
        self.upsell = Some(upsell);
    }

    /// Entry point per inbound message. Pre-flush fragments yield no
    /// outbound; only the flushing call drives the state machine.
    #[instrument(skip_all, fields(tenant = %tenant, phone = %mask_phone(phone)))]
    pub async fn process_message(
        &self,
        tenant: &str,
        phone: &str,
        text: &str,
        display_name: Option<&str>,
    ) -> ConversationResponse {
        // A frozen conversation answers with the handoff template and
        // nothing else; the machine does not advance.
        match self.handoff.is_active(tenant, phone).await {
            Ok(true) => {
                let reply = self
                    .machine
                    .templates()
                    .render("human_handoff_active", &Value::Null)
                    .unwrap_or_default();
                self.send(phone, &reply).await;
                return ConversationResponse::transfer_human(reply);
            }
            Ok(false) => {}
            Err(e) => warn!("Handoff check failed, continuing: {}", e),
        }

        match self.buffer.append(tenant, phone, text).await {
            BufferOutcome::Pending => ConversationResponse::buffered(),
            BufferOutcome::Ready(aggregated) => {
                self.handle_aggregated(tenant, phone, &aggregated, display_name)
                    .await
            }
        }
    }

    /// Target of the buffer's delayed flush timer.
    pub async fn handle_flush(&self, event: FlushEvent) -> ConversationResponse {
        self.handle_aggregated(&event.tenant, &event.phone, &event.aggregated, None)
            .await
    }

    pub async fn handle_aggregated(
        &self,
        tenant: &str,
        phone: &str,
        text: &str,
        display_name: Option<&str>,
    ) -> ConversationResponse {
        let lock = self.phone_lock(tenant, phone).await;
        let _guard = lock.lock().await;

        match self.run_turn(tenant, phone, text, display_name).await {
            Ok(response) => response,
            Err(e) => {
                error!("Conversation turn failed: {}", e);
                self.apologize(tenant, phone).await
            }
        }
    }

    async fn run_turn(
        &self,
        tenant: &str,
        phone: &str,
        text: &str,
        display_name: Option<&str>,
    ) -> Result<ConversationResponse, ConversationError> {
        let mut ctx = self.load_context(tenant, phone).await;

        // The upsell scheduler gets first right of refusal after an offer.
        if let Some(upsell) = &self.upsell {
            if let Some(reply) = upsell.interpret_reply(&ctx, text).await {
                self.send(phone, &reply).await;
                ctx.push_history("user", text);
                ctx.push_history("assistant", &reply);
                self.persist(&mut ctx).await?;
                return Ok(ConversationResponse::answered(reply));
            }
        }

        ctx.raw_message = text.to_string();
        if let Some(name) = display_name {
            ctx.set_var("user_name", Value::String(name.to_string()));
        }

        let analysis = self.analyzer.analyze(text);
        for (flag, intent) in [
            ("option_1", Intent::Option1),
            ("option_2", Intent::Option2),
            ("explicit_schedule", Intent::ExplicitSchedule),
            ("ambiguous_schedule", Intent::AmbiguousSchedule),
            ("stop", Intent::Stop),
            ("unknown", Intent::Unknown),
        ] {
            ctx.set_var(flag, Value::Bool(analysis.intent == intent));
        }
        ctx.set_var(
            "nlp_confidence",
            serde_json::Number::from_f64(analysis.confidence)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        );

        let first_contact = ctx.state == STATE_START;
        if !first_contact {
            self.fill_slots(&mut ctx, text, analysis.intent).await?;
        }

        let outcome = if first_contact {
            // The first message is the greeting that wakes the bot; START's
            // entry actions answer it.
            self.machine.enter(&mut ctx, STATE_START).await?
        } else {
            self.machine.on_message(&mut ctx).await?
        };

        if outcome.entered_state(STATE_CONFIRMED) {
            if let Some(upsell) = &self.upsell {
                upsell.on_booking_confirmed(&ctx).await;
            }
        }

        let reply = if outcome.replies.is_empty() {
            None
        } else {
            Some(outcome.replies.join("\n\n"))
        };

        ctx.push_history("user", text);
        if let Some(reply_text) = &reply {
            ctx.push_history("assistant", reply_text);
            self.send(phone, reply_text).await;
        }

        self.persist(&mut ctx).await?;

        Ok(match reply {
            Some(reply_text) => ConversationResponse::answered(reply_text),
            None => ConversationResponse::silent("no_reply"),
        })
    }

    /// Slot filling ahead of the declarative graph: menu digits select from
    /// the stored top-3 while clarifying, free text goes through the
    /// disambiguation engine.
    async fn fill_slots(
        &self,
        ctx: &mut ConversationContext,
        text: &str,
        intent: Intent,
    ) -> Result<(), ConversationError> {
        // Digit selection from a previously shown suggestion list.
        if ctx.state == STATE_VALIDATE && !ctx.slots.top3.is_empty() {
            let normalized = normalize_text(text);
            if let Ok(choice) = normalized.parse::<usize>() {
                if (1..=ctx.slots.top3.len().min(3)).contains(&choice) {
                    let selected = ctx.slots.top3[choice - 1].clone();
                    debug!("User selected suggestion {}", selected.service_id);
                    ctx.slots.service_id = Some(selected.service_id);
                    ctx.slots.service_name = Some(selected.name.clone());
                    ctx.slots.raw_query = Some(selected.name);
                    ctx.slots.category = None;
                    return Ok(());
                }
            }
        }

        // Menu-style intents carry no service information.
        if matches!(intent, Intent::Option1 | Intent::Option2 | Intent::Stop) {
            return Ok(());
        }

        // Explicit booking requests carry the service after a verb; search
        // with the service itself.
        let query = if intent == Intent::ExplicitSchedule {
            self.analyzer.extract_service_query(text)
        } else {
            text.to_string()
        };

        let classification = self.classifier.classify(&ctx.tenant, &query).await?;
        let normalized_query = normalize_text(&query);
        ctx.slots.raw_query = Some(query);
        ctx.set_var(
            "query_kind",
            serde_json::to_value(classification.kind).unwrap_or(Value::Null),
        );

        match classification.kind {
            QueryKind::Explicit => {
                let suggestion = &classification.suggestions[0];
                ctx.slots.service_id = Some(suggestion.service_id);
                ctx.slots.service_name = Some(suggestion.name.clone());
                ctx.slots.category = None;
            }
            QueryKind::Category => {
                ctx.slots.category = Some(normalized_query);
                ctx.slots.service_id = None;
                ctx.slots.service_name = None;
                ctx.slots.top3 = classification.suggestions;
            }
            QueryKind::Ambiguous | QueryKind::Invalid => {
                ctx.slots.category = None;
                ctx.slots.service_id = None;
                ctx.slots.service_name = None;
                if !classification.suggestions.is_empty() {
                    ctx.slots.top3 = classification.suggestions;
                }
            }
        }
        Ok(())
    }

    async fn apologize(&self, tenant: &str, phone: &str) -> ConversationResponse {
        let reply = self
            .machine
            .templates()
            .render("apology_error", &Value::Null)
            .unwrap_or_else(|_| "Desculpa, tive um problema aqui.".to_string());
        self.send(phone, &reply).await;

        // The context restarts from the menu; the input is not retried.
        let mut fresh = ConversationContext::new(tenant, phone);
        fresh.state = STATE_START.to_string();
        if let Err(e) = self.persist(&mut fresh).await {
            error!("Failed to persist reset context: {}", e);
        }

        ConversationResponse {
            reply: Some(reply),
            action: "error".to_string(),
        }
    }

    async fn load_context(&self, tenant: &str, phone: &str) -> ConversationContext {
        let key = ConversationRef::new(tenant, phone).cache_key();
        let ttl = chrono::Duration::from_std(self.conversation_ttl)
            .unwrap_or_else(|_| chrono::Duration::hours(2));

        {
            let cache = self.cache.lock().await;
            if let Some(ctx) = cache.get(&key) {
                if Utc::now() - ctx.last_activity < ttl {
                    return ctx.clone();
                }
            }
        }

        match self.store.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<ConversationContext>(&raw) {
                Ok(ctx) if Utc::now() - ctx.last_activity < ttl => ctx,
                Ok(_) => ConversationContext::new(tenant, phone),
                Err(e) => {
                    // A corrupt blob resets the conversation instead of
                    // poisoning every later message.
                    warn!("Corrupt context blob, starting fresh: {}", e);
                    ConversationContext::new(tenant, phone)
                }
            },
            Ok(None) => ConversationContext::new(tenant, phone),
            Err(e) => {
                warn!("Context load failed, starting fresh: {}", e);
                ConversationContext::new(tenant, phone)
            }
        }
    }

    async fn persist(&self, ctx: &mut ConversationContext) -> Result<(), ConversationError> {
        ctx.last_activity = Utc::now();
        let key = ConversationRef::new(&ctx.tenant, &ctx.phone).cache_key();
        let raw = serde_json::to_string(ctx)?;
        self.store
            .set(&key, &raw, Some(self.conversation_ttl))
            .await?;
        self.cache.lock().await.insert(key, ctx.clone());
        Ok(())
    }

    async fn send(&self, phone: &str, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Err(e) = self.messenger.send_text(phone, text).await {
            error!("Outbound send failed: {}", e);
        }
    }

    async fn phone_lock(&self, tenant: &str, phone: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        if locks.len() > 10_000 {
            // Keyed mutexes are tiny; prune wholesale when the map grows.
            locks.clear();
        }
        locks
            .entry(format!("{}:{}", tenant, phone))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // ----- admin surface -----

    pub async fn admin_get_context(
        &self,
        tenant: &str,
        phone: &str,
    ) -> Result<Option<Value>, ConversationError> {
        let key = ConversationRef::new(tenant, phone).cache_key();
        match self.store.get(&key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn admin_set_context(
        &self,
        tenant: &str,
        phone: &str,
        value: Value,
    ) -> Result<(), ConversationError> {
        let mut ctx: ConversationContext = serde_json::from_value(value)?;
        ctx.tenant = tenant.to_string();
        ctx.phone = phone.to_string();
        if !self.machine.flow().has_state(&ctx.state) {
            return Err(ConversationError::UnknownState(ctx.state));
        }
        self.persist(&mut ctx).await
    }

    pub async fn admin_list_phones(&self, tenant: &str) -> Result<Vec<String>, ConversationError> {
        let prefix = format!("conv:{}:", tenant);
        let keys = self.store.scan_prefix(&prefix).await?;
        Ok(keys
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(|s| s.to_string()))
            .collect())
    }
}
