use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use booking_cell::{AppointmentAuditLog, AvailabilityService, BookingService, TrinksClient};
use catalog_cell::services::sync::SyncConfig;
use catalog_cell::{CatalogDiffService, CatalogStore, CatalogSyncService};
use channel_cell::{EvolutionClient, MessageDeduper, OutboundMessenger};
use conversation_cell::{
    Analyzer, ConversationController, CreateAppointmentTool, DisambiguationService,
    FlowDefinition, FlushEvent, HandoffService, MessageBuffer, SearchTopServicesTool,
    StateMachine, TemplateRegistry, ToolRegistry, ValidateAvailabilityTool,
};
use monitoring_cell::MonitoringState;
use security_cell::{
    AdminGate, BreakerConfig, CircuitBreakerRegistry, RateLimitConfig, RateLimitService,
    WebhookVerifier,
};
use shared_config::AppConfig;
use shared_storage::{KeyValueStore, MemoryStore, RedisStore};
use upsell_cell::{
    AddonRecommender, UpsellBridge, UpsellConfig, UpsellEventLog, UpsellJobStore, UpsellScheduler,
    UpsellWorker,
};

/// Everything the routers need, built once at startup. The explicit wiring
/// replaces the ambient singletons of a scripting runtime: lifecycles are
/// owned here and injected downward.
pub struct Dependencies {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn KeyValueStore>,
    pub verifier: Arc<WebhookVerifier>,
    pub rate_limiter: Arc<RateLimitService>,
    pub admin_gate: Arc<AdminGate>,
    pub deduper: Arc<MessageDeduper>,
    pub controller: Arc<ConversationController>,
    pub handoff: Arc<HandoffService>,
    pub catalog_sync: Arc<CatalogSyncService>,
    pub catalog_diff: Arc<CatalogDiffService>,
    pub upsell_scheduler: Arc<UpsellScheduler>,
    pub upsell_worker: Arc<UpsellWorker>,
    pub monitoring: MonitoringState,
}

pub async fn build(config: AppConfig) -> Result<Dependencies, String> {
    let config = Arc::new(config);

    let store: Arc<dyn KeyValueStore> = match &config.redis_url {
        Some(url) => Arc::new(
            RedisStore::new(url)
                .await
                .map_err(|e| format!("redis init failed: {}", e))?,
        ),
        None => {
            warn!("REDIS_URL not set, using in-process store");
            Arc::new(MemoryStore::new())
        }
    };

    // Security envelope.
    let verifier = Arc::new(
        WebhookVerifier::new(
            &config.hmac_secret_current,
            config.hmac_secret_prev.as_deref(),
        )
        .map_err(|e| format!("hmac key ring invalid: {}", e))?,
    );
    let rate_limiter = Arc::new(RateLimitService::new(
        store.clone(),
        RateLimitConfig::new(
            config.rate_ip_rpm,
            config.rate_phone_rpm,
            config.ban_window_min,
            &config.internal_cidrs,
        ),
    ));
    let admin_gate = Arc::new(AdminGate::new(
        &config.admin_token,
        &config.admin_jwt_secret,
        &config.admin_ip_allowlist,
    ));
    let breakers = Arc::new(CircuitBreakerRegistry::new(BreakerConfig {
        error_rate_limit: config.cb_error_rate_limit,
        open_duration: Duration::from_secs(config.cb_open_secs),
        ..BreakerConfig::default()
    }));

    // Provider and outbound channel.
    let trinks: Arc<TrinksClient> = Arc::new(TrinksClient::new(&config));
    let messenger: Arc<dyn OutboundMessenger> = Arc::new(EvolutionClient::new(
        &config,
        breakers.for_dependency("evolution"),
    ));

    // Catalog mirror and sync.
    let audit = Arc::new(AppointmentAuditLog::new(store.clone()));
    let catalog = Arc::new(CatalogStore::new(store.clone(), audit.clone()));
    if let Err(e) = catalog.hydrate(&config.tenant_default).await {
        warn!("Catalog hydration failed, mirror starts empty: {}", e);
    }
    let catalog_sync = Arc::new(CatalogSyncService::new(
        trinks.clone(),
        catalog.clone(),
        store.clone(),
        SyncConfig {
            page_size: config.catalog_sync_page_size,
            lock_ttl: Duration::from_secs(config.catalog_sync_lock_ttl_sec),
            watermark_override: config.catalog_sync_watermark_override.clone(),
        },
    ));
    let catalog_diff = Arc::new(CatalogDiffService::new(
        trinks.clone(),
        catalog.clone(),
        config.catalog_sync_page_size,
    ));

    // Conversation core.
    let analyzer = Arc::new(Analyzer::with_default_config());
    let classifier = Arc::new(DisambiguationService::new(catalog.clone(), analyzer.clone()));
    let availability = Arc::new(AvailabilityService::new(
        trinks.clone(),
        breakers.for_dependency("trinks"),
    ));
    let booking = Arc::new(BookingService::new(trinks.clone(), audit.clone()));
    let handoff = Arc::new(HandoffService::new(store.clone(), config.handoff_ttl_hours));

    let flow = if std::path::Path::new(&config.flow_file).exists() {
        FlowDefinition::from_file(&config.flow_file).map_err(|e| e.to_string())?
    } else {
        info!("Flow file {} not found, using built-in flow", config.flow_file);
        FlowDefinition::built_in()
    };
    let timezone = config
        .timezone
        .parse::<chrono_tz::Tz>()
        .unwrap_or(chrono_tz::America::Bahia);
    let tools = ToolRegistry::new()
        .register(Arc::new(SearchTopServicesTool::new(catalog.clone())))
        .register(Arc::new(ValidateAvailabilityTool::new(availability, timezone)))
        .register(Arc::new(CreateAppointmentTool::new(
            booking,
            trinks.clone(),
            catalog.clone(),
        )));
    let machine = Arc::new(
        StateMachine::new(
            flow,
            TemplateRegistry::default(),
            tools,
            handoff.clone(),
            analyzer.clone(),
        )
        .map_err(|e| e.to_string())?,
    );

    let (buffer, flush_rx) = MessageBuffer::new(
        store.clone(),
        Duration::from_secs(config.buffer_window_seconds),
        config.buffer_max_messages,
    );

    // Upsell.
    let upsell_events = Arc::new(UpsellEventLog::new(store.clone()));
    let upsell_jobs = Arc::new(UpsellJobStore::new(store.clone()));
    let upsell_scheduler = Arc::new(UpsellScheduler::new(
        UpsellConfig::from_app(&config),
        Arc::new(AddonRecommender::new(catalog.clone())),
        upsell_events,
        upsell_jobs,
        messenger.clone(),
        trinks.clone(),
    ));
    let upsell_worker = Arc::new(UpsellWorker::new(
        upsell_scheduler.clone(),
        Duration::from_secs(60),
        config.upsell_retry_delay_min,
    ));

    let mut controller = ConversationController::new(
        store.clone(),
        buffer,
        machine,
        analyzer,
        classifier,
        handoff.clone(),
        messenger,
        config.conversation_ttl_hours,
    );
    controller.set_upsell(Arc::new(UpsellBridge::new(upsell_scheduler.clone())));
    let controller = Arc::new(controller);

    spawn_flush_worker(controller.clone(), flush_rx);

    let monitoring = MonitoringState {
        prometheus: monitoring_cell::install_prometheus_recorder(),
        store: store.clone(),
        breakers: breakers.clone(),
        started_at: Instant::now(),
    };
    let deduper = Arc::new(MessageDeduper::new(store.clone()));

    Ok(Dependencies {
        config,
        store,
        verifier,
        rate_limiter,
        admin_gate,
        deduper,
        controller,
        handoff,
        catalog_sync,
        catalog_diff,
        upsell_scheduler,
        upsell_worker,
        monitoring,
    })
}

fn spawn_flush_worker(
    controller: Arc<ConversationController>,
    mut flush_rx: tokio::sync::mpsc::UnboundedReceiver<FlushEvent>,
) {
    tokio::spawn(async move {
        while let Some(event) = flush_rx.recv().await {
            controller.handle_flush(event).await;
        }
        info!("Buffer flush worker stopped");
    });
}
