use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use catalog_cell::handlers::CatalogHandlersState;
use conversation_cell::handlers::ConversationHandlersState;
use monitoring_cell::create_monitoring_router;
use security_cell::admin_guard;
use security_cell::handlers::SecurityHandlersState;
use upsell_cell::handlers::UpsellHandlersState;

use crate::state::Dependencies;
use crate::webhook::{self, WebhookState};

pub fn create_router(deps: &Dependencies) -> Router {
    let webhook_state = WebhookState {
        config: deps.config.clone(),
        verifier: deps.verifier.clone(),
        rate_limiter: deps.rate_limiter.clone(),
        deduper: deps.deduper.clone(),
        controller: deps.controller.clone(),
    };

    let security_state = SecurityHandlersState {
        gate: deps.admin_gate.clone(),
        verifier: deps.verifier.clone(),
    };
    let conversation_state = ConversationHandlersState {
        controller: deps.controller.clone(),
        handoff: deps.handoff.clone(),
        tenant_default: deps.config.tenant_default.clone(),
    };
    let catalog_state = CatalogHandlersState {
        sync: deps.catalog_sync.clone(),
        diff: deps.catalog_diff.clone(),
        tenant_default: deps.config.tenant_default.clone(),
    };
    let upsell_state = UpsellHandlersState {
        scheduler: deps.upsell_scheduler.clone(),
        tenant_default: deps.config.tenant_default.clone(),
    };

    // Everything under /admin sits behind the bearer + IP-allowlist guard;
    // login is the only way in and lives outside it.
    let admin_protected = Router::new()
        .route("/state/{phone}", get(conversation_cell::handlers::get_state))
        .route("/state/{phone}", post(conversation_cell::handlers::set_state))
        .route("/states", get(conversation_cell::handlers::list_states))
        .route("/handoff/{phone}", post(conversation_cell::handlers::activate_handoff))
        .route("/handoff/{phone}", delete(conversation_cell::handlers::clear_handoff))
        .with_state(conversation_state)
        .merge(
            Router::new()
                .route("/sync-servicos", post(catalog_cell::handlers::trigger_sync))
                .route("/catalog/diff", get(catalog_cell::handlers::diff_report))
                .with_state(catalog_state),
        )
        .merge(
            Router::new()
                .route("/rotate-secret", post(security_cell::handlers::rotate_secret))
                .with_state(security_state.clone()),
        )
        .merge(
            Router::new()
                .route("/upsell/metrics", get(upsell_cell::handlers::upsell_metrics))
                .route("/upsell/health", get(upsell_cell::handlers::upsell_health))
                .route("/upsell/test", post(upsell_cell::handlers::test_upsell))
                .with_state(upsell_state),
        )
        .layer(middleware::from_fn_with_state(
            deps.admin_gate.clone(),
            admin_guard,
        ));

    let admin_routes = Router::new()
        .route(
            "/login",
            post(security_cell::handlers::login).with_state(security_state),
        )
        .merge(admin_protected);

    Router::new()
        .route("/", get(|| async { "Conversational booking router is running!" }))
        .route("/webhooks/messaging", post(webhook::receive_webhook))
        .with_state(webhook_state)
        .nest("/admin", admin_routes)
        .merge(create_monitoring_router(deps.monitoring.clone()))
}
