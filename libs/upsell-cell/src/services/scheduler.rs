use chrono::{Duration as ChronoDuration, Utc};
use rand::thread_rng;
use regex::Regex;
use serde_json::json;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Instant;
use tracing::{info, instrument, warn};

use booking_cell::BookingProvider;
use channel_cell::OutboundMessenger;
use shared_config::AppConfig;
use shared_utils::template::render_template;

use crate::error::UpsellError;
use crate::models::{
    Addon, JobStatus, PositionVariant, ScheduledUpsellJob, UpsellEvent, UpsellEventKind, Variant,
};
use crate::services::addon::AddonRecommender;
use crate::services::events::UpsellEventLog;
use crate::services::jobs::UpsellJobStore;
use crate::services::variants::VariantPicker;

const COPY_A: &str = "Aproveita que você já vai estar aqui! ✨ Quer adicionar \
{{addon.nome}} ({{addon.duracao}} min) por {{addon.preco}}? Responda 1 para adicionar.";
const COPY_B: &str = "Nossas clientes adoram combinar com {{addon.nome}} — são só \
{{addon.duracao}} min a mais, por {{addon.preco}}. Quer incluir? Responda 1 que eu adiciono.";
const CONFIRM_ADDED: &str = "Adicionei {{addon.nome}} ao seu atendimento! 💖";
const ADDED_PENDING: &str = "O salão vai confirmar o horário extra em instantes.";
const DECLINED: &str = "Sem problemas! Fica para a próxima. 😊";

fn accept_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^1$|\b(sim|quero|aceito|adicionar|pode sim)\b").unwrap()
    })
}

fn decline_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bnao\b|talvez depois|agora nao").unwrap())
}

#[derive(Debug, Clone)]
pub struct UpsellConfig {
    pub enabled: bool,
    pub delay_min: i64,
    pub copy_a_weight: f64,
    pub pos_immediate_weight: f64,
    pub max_attempts: u32,
    pub retry_delay_min: i64,
}

impl UpsellConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            enabled: config.upsell_enabled,
            delay_min: config.upsell_delay_min,
            copy_a_weight: config.upsell_copy_a_weight,
            pos_immediate_weight: config.upsell_pos_immediate_weight,
            max_attempts: config.upsell_max_attempts,
            retry_delay_min: config.upsell_retry_delay_min,
        }
    }
}

/// One booking confirmation as the scheduler sees it.
#[derive(Debug, Clone)]
pub struct BookingConfirmed {
    pub tenant: String,
    pub conversation_id: String,
    pub phone: String,
    pub appointment_id: i64,
    pub primary_service_id: i64,
}

/// At most one add-on offer per conversation, split across copy and position
/// variants, tracked in the append-only event log.
pub struct UpsellScheduler {
    config: UpsellConfig,
    recommender: Arc<AddonRecommender>,
    events: Arc<UpsellEventLog>,
    jobs: Arc<UpsellJobStore>,
    messenger: Arc<dyn OutboundMessenger>,
    provider: Arc<dyn BookingProvider>,
    picker: VariantPicker,
}

impl UpsellScheduler {
    pub fn new(
        config: UpsellConfig,
        recommender: Arc<AddonRecommender>,
        events: Arc<UpsellEventLog>,
        jobs: Arc<UpsellJobStore>,
        messenger: Arc<dyn OutboundMessenger>,
        provider: Arc<dyn BookingProvider>,
    ) -> Self {
        let picker = VariantPicker::new(config.copy_a_weight, config.pos_immediate_weight);
        Self {
            config,
            recommender,
            events,
            jobs,
            messenger,
            provider,
            picker,
        }
    }

    pub fn events(&self) -> Arc<UpsellEventLog> {
        self.events.clone()
    }

    pub fn jobs(&self) -> Arc<UpsellJobStore> {
        self.jobs.clone()
    }

    /// Entry point on SCHEDULING_CONFIRMED. `forced` pins the variant for
    /// admin test traffic; production draws per invocation.
    #[instrument(skip(self, booking), fields(conversation = %booking.conversation_id))]
    pub async fn on_booking_confirmed(
        &self,
        booking: BookingConfirmed,
        forced: Option<Variant>,
    ) -> Result<UpsellEventKind, UpsellError> {
        if !self.config.enabled {
            return Ok(UpsellEventKind::NothingToOffer);
        }
        let started = Instant::now();

        let state = self.events.conversation_state(&booking.conversation_id).await?;
        if state.has_shown {
            self.append(&booking, UpsellEventKind::AlreadyOffered, None, None, started, None)
                .await?;
            return Ok(UpsellEventKind::AlreadyOffered);
        }

        let addon = match self
            .recommender
            .recommended_addon(&booking.tenant, booking.primary_service_id)
            .await?
        {
            Some(addon) => addon,
            None => {
                self.append(&booking, UpsellEventKind::NothingToOffer, None, None, started, None)
                    .await?;
                return Ok(UpsellEventKind::NothingToOffer);
            }
        };

        let variant = forced.unwrap_or_else(|| self.picker.draw(&mut thread_rng()));
        self.events
            .remember_addon(&booking.conversation_id, &addon)
            .await?;

        match variant.position {
            PositionVariant::Immediate => {
                self.deliver(&booking, &addon, variant, started).await?;
                Ok(UpsellEventKind::Shown)
            }
            PositionVariant::Delay10 => {
                let now = Utc::now();
                let job = ScheduledUpsellJob {
                    id: ScheduledUpsellJob::stable_id(
                        &booking.conversation_id,
                        booking.appointment_id,
                        now,
                    ),
                    tenant: booking.tenant.clone(),
                    conversation_id: booking.conversation_id.clone(),
                    phone: booking.phone.clone(),
                    appointment_id: booking.appointment_id,
                    primary_service_id: booking.primary_service_id,
                    scheduled_for: now + ChronoDuration::minutes(self.config.delay_min),
                    variant,
                    attempts: 0,
                    max_attempts: self.config.max_attempts,
                    status: JobStatus::Pending,
                    last_error: None,
                };
                self.jobs.save(&job).await?;
                self.append(
                    &booking,
                    UpsellEventKind::Scheduled,
                    Some(&addon),
                    Some(variant),
                    started,
                    None,
                )
                .await?;
                info!("Upsell deferred by {} min", self.config.delay_min);
                Ok(UpsellEventKind::Scheduled)
            }
        }
    }

    /// The immediate-dispatch path, shared by IMMEDIATE offers and the
    /// delayed worker. Claims the per-conversation "shown" slot before the
    /// send and releases it when the send fails so a retry can run.
    pub(crate) async fn deliver(
        &self,
        booking: &BookingConfirmed,
        addon: &Addon,
        variant: Variant,
        started: Instant,
    ) -> Result<(), UpsellError> {
        if !self.events.claim_shown(&booking.conversation_id).await? {
            self.append(booking, UpsellEventKind::AlreadyOffered, Some(addon), Some(variant), started, None)
                .await?;
            return Ok(());
        }

        let template = match variant.copy {
            crate::models::CopyVariant::A => COPY_A,
            crate::models::CopyVariant::B => COPY_B,
        };
        let text = render_template(template, &addon_scope(addon));

        if let Err(e) = self.messenger.send_text(&booking.phone, &text).await {
            warn!("Upsell send failed: {}", e);
            self.events.release_shown(&booking.conversation_id).await?;
            self.append(
                booking,
                UpsellEventKind::Error,
                Some(addon),
                Some(variant),
                started,
                Some(e.to_string()),
            )
            .await?;
            return Err(UpsellError::Send(e.to_string()));
        }

        self.append(booking, UpsellEventKind::Shown, Some(addon), Some(variant), started, None)
            .await?;
        Ok(())
    }

    /// Interprets an inbound text after an offer. `Some(reply)` means the
    /// message was consumed by the upsell flow; the caller sends the reply.
    #[instrument(skip(self, text))]
    pub async fn interpret_reply(
        &self,
        booking: &BookingConfirmed,
        text: &str,
    ) -> Result<Option<String>, UpsellError> {
        let state = self.events.conversation_state(&booking.conversation_id).await?;
        if !state.has_shown {
            return Ok(None);
        }
        let Some(addon) = state.last_addon else {
            return Ok(None);
        };

        let normalized = shared_utils::normalize::normalize_text(text);
        let started = Instant::now();
        let scope = addon_scope(&addon);

        // "não quero" must read as a decline even though it contains an
        // acceptance word.
        if decline_re().is_match(&normalized) {
            self.append(booking, UpsellEventKind::Declined, Some(&addon), state.last_variant, started, None)
                .await?;
            return Ok(Some(render_template(DECLINED, &scope)));
        }

        if accept_re().is_match(&normalized) {
            let mut reply = render_template(CONFIRM_ADDED, &scope);

            match self
                .provider
                .append_service_to_appointment(booking.appointment_id, addon.service_id)
                .await
            {
                Ok(()) => {
                    reply.push_str("\n\n");
                    reply.push_str(ADDED_PENDING);
                    self.append(booking, UpsellEventKind::Accepted, Some(&addon), state.last_variant, started, None)
                        .await?;
                }
                Err(e) => {
                    warn!("append_service failed: {}", e);
                    self.append(
                        booking,
                        UpsellEventKind::Error,
                        Some(&addon),
                        state.last_variant,
                        started,
                        Some(e.to_string()),
                    )
                    .await?;
                }
            }
            return Ok(Some(reply));
        }

        Ok(None)
    }

    /// Runs one due job from the periodic worker.
    pub async fn deliver_job(&self, job: &ScheduledUpsellJob) -> Result<(), UpsellError> {
        let booking = BookingConfirmed {
            tenant: job.tenant.clone(),
            conversation_id: job.conversation_id.clone(),
            phone: job.phone.clone(),
            appointment_id: job.appointment_id,
            primary_service_id: job.primary_service_id,
        };
        let started = Instant::now();

        // Recommend again at delivery time; the catalog may have moved.
        let addon = match self
            .recommender
            .recommended_addon(&job.tenant, job.primary_service_id)
            .await?
        {
            Some(addon) => addon,
            None => {
                self.append(&booking, UpsellEventKind::NothingToOffer, None, None, started, None)
                    .await?;
                return Ok(());
            }
        };
        self.events
            .remember_addon(&job.conversation_id, &addon)
            .await?;
        self.deliver(&booking, &addon, job.variant, started).await
    }

    async fn append(
        &self,
        booking: &BookingConfirmed,
        kind: UpsellEventKind,
        addon: Option<&Addon>,
        variant: Option<Variant>,
        started: Instant,
        error_message: Option<String>,
    ) -> Result<(), UpsellError> {
        self.events
            .append(&UpsellEvent {
                tenant: booking.tenant.clone(),
                conversation_id: booking.conversation_id.clone(),
                phone: booking.phone.clone(),
                event: kind,
                addon_id: addon.map(|a| a.service_id),
                addon_price: addon.and_then(|a| a.preco),
                variant_copy: variant.map(|v| v.copy),
                variant_position: variant.map(|v| v.position),
                appointment_id: booking.appointment_id,
                primary_service_id: booking.primary_service_id,
                processing_ms: Some(started.elapsed().as_millis() as u64),
                error_message,
                created_at: Utc::now(),
            })
            .await
    }
}

fn addon_scope(addon: &Addon) -> serde_json::Value {
    let preco = match addon.preco {
        Some(p) => format!("R$ {:.2}", p).replace('.', ","),
        None => "valor sob consulta".to_string(),
    };
    json!({
        "addon": {
            "nome": addon.nome,
            "duracao": addon.duracao,
            "preco": preco,
        }
    })
}
