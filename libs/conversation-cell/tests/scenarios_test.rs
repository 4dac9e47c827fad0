use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use booking_cell::{
    AppointmentAuditLog, AppointmentResponse, AvailabilityResult, AvailabilityService,
    BookingError, BookingProvider, CreateAppointmentRequest, ProviderClient, ServicesPage,
};
use catalog_cell::{CatalogItem, CatalogStore};
use channel_cell::{ChannelError, OutboundMessenger};
use conversation_cell::{
    Analyzer, ConversationController, CreateAppointmentTool, DisambiguationService,
    FlowDefinition, HandoffService, MessageBuffer, SearchTopServicesTool, StateMachine,
    TemplateRegistry, ToolRegistry, ValidateAvailabilityTool,
};
use security_cell::{BreakerConfig, CircuitBreaker};
use shared_storage::{KeyValueStore, MemoryStore};
use shared_utils::normalize::normalize_text;

const PHONE: &str = "5511999999991";

struct OkProvider;

#[async_trait]
impl BookingProvider for OkProvider {
    async fn get_services_page(
        &self,
        _updated_since: Option<DateTime<Utc>>,
        _page: u32,
        _limit: u32,
    ) -> Result<ServicesPage, BookingError> {
        unimplemented!()
    }

    async fn validate_availability(
        &self,
        _service_id: i64,
        _professional_id: Option<i64>,
        _start_iso: &str,
    ) -> Result<AvailabilityResult, BookingError> {
        Ok(AvailabilityResult::confirmed_ok())
    }

    async fn create_appointment(
        &self,
        _request: &CreateAppointmentRequest,
    ) -> Result<AppointmentResponse, BookingError> {
        unimplemented!()
    }

    async fn find_client_by_phone(
        &self,
        _phone: &str,
    ) -> Result<Option<ProviderClient>, BookingError> {
        unimplemented!()
    }

    async fn append_service_to_appointment(
        &self,
        _appointment_id: i64,
        _addon_service_id: i64,
    ) -> Result<(), BookingError> {
        unimplemented!()
    }
}

#[derive(Default)]
struct RecordingMessenger {
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl OutboundMessenger for RecordingMessenger {
    async fn send_text(&self, phone: &str, text: &str) -> Result<(), ChannelError> {
        self.sent
            .lock()
            .await
            .push((phone.to_string(), text.to_string()));
        Ok(())
    }
}

fn item(service_id: i64, name: &str, category: &str, price: Option<f64>) -> CatalogItem {
    CatalogItem {
        tenant: "default".to_string(),
        service_id,
        professional_id: 0,
        service_name: name.to_string(),
        normalized_name: normalize_text(name),
        category: category.to_string(),
        normalized_category: normalize_text(category),
        duration_min: 60,
        price,
        visible: true,
        active: true,
        last_synced_at: Utc::now(),
    }
}

struct Fixture {
    controller: Arc<ConversationController>,
    handoff: Arc<HandoffService>,
    messenger: Arc<RecordingMessenger>,
    store: Arc<dyn KeyValueStore>,
}

async fn fixture_with_window(window: Duration) -> Fixture {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let audit = Arc::new(AppointmentAuditLog::new(store.clone()));
    let catalog = Arc::new(CatalogStore::new(store.clone(), audit));
    catalog
        .upsert(
            "default",
            vec![
                item(1, "Corte de Cabelo Feminino", "Cabelo", Some(90.0)),
                item(2, "Corte de Cabelo Masculino", "Cabelo", Some(60.0)),
                item(3, "Escova Progressiva", "Cabelo", Some(180.0)),
                item(4, "Manicure", "Unhas", Some(40.0)),
                item(5, "Dia da Beleza Completo", "Beleza", Some(250.0)),
                item(6, "Pacote Beleza Noiva", "Beleza", Some(400.0)),
            ],
        )
        .await
        .unwrap();

    let analyzer = Arc::new(Analyzer::with_default_config());
    let classifier = Arc::new(DisambiguationService::new(catalog.clone(), analyzer.clone()));
    let availability = Arc::new(AvailabilityService::new(
        Arc::new(OkProvider),
        Arc::new(CircuitBreaker::new("trinks", BreakerConfig::default())),
    ));

    let provider: Arc<dyn BookingProvider> = Arc::new(OkProvider);
    let booking = Arc::new(booking_cell::BookingService::new(
        provider.clone(),
        Arc::new(AppointmentAuditLog::new(store.clone())),
    ));
    let tools = ToolRegistry::new()
        .register(Arc::new(SearchTopServicesTool::new(catalog.clone())))
        .register(Arc::new(ValidateAvailabilityTool::new(
            availability,
            chrono_tz::America::Bahia,
        )))
        .register(Arc::new(CreateAppointmentTool::new(
            booking,
            provider,
            catalog.clone(),
        )));

    let handoff = Arc::new(HandoffService::new(store.clone(), 1));
    let machine = Arc::new(
        StateMachine::new(
            FlowDefinition::built_in(),
            TemplateRegistry::default(),
            tools,
            handoff.clone(),
            analyzer.clone(),
        )
        .unwrap(),
    );

    let (buffer, mut flush_rx) = MessageBuffer::new(store.clone(), window, 8);
    let messenger = Arc::new(RecordingMessenger::default());

    let controller = Arc::new(ConversationController::new(
        store.clone(),
        buffer.clone(),
        machine,
        analyzer,
        classifier,
        handoff.clone(),
        messenger.clone(),
        2,
    ));

    // The flush worker that normally lives in the API process.
    let flush_controller = controller.clone();
    tokio::spawn(async move {
        while let Some(event) = flush_rx.recv().await {
            flush_controller.handle_flush(event).await;
        }
    });

    Fixture {
        controller,
        handoff,
        messenger,
        store,
    }
}

async fn fixture() -> Fixture {
    fixture_with_window(Duration::from_millis(10_000)).await
}

/// Drives one aggregated message (the post-flush path) and returns the reply.
async fn say(fixture: &Fixture, text: &str) -> String {
    let response = fixture
        .controller
        .handle_aggregated("default", PHONE, text, None)
        .await;
    response.reply.unwrap_or_default()
}

async fn current_state(fixture: &Fixture) -> String {
    fixture
        .controller
        .admin_get_context("default", PHONE)
        .await
        .unwrap()
        .map(|ctx| ctx["state"].as_str().unwrap_or_default().to_string())
        .unwrap_or_default()
}

#[tokio::test]
async fn s1_menu_to_booking_with_disambiguation() {
    let fx = fixture().await;

    let menu = say(&fx, "Oi").await;
    assert!(menu.contains('1'), "menu: {}", menu);
    assert!(menu.contains("Agendar"), "menu: {}", menu);
    assert!(menu.contains('2'), "menu: {}", menu);
    assert!(menu.contains("Informações"), "menu: {}", menu);

    let clarify = say(&fx, "1").await;
    assert!(clarify.contains("serviço"), "clarify: {}", clarify);
    assert_eq!(current_state(&fx).await, "VALIDATE_BEFORE_CONFIRM");

    let options = say(&fx, "cabelo").await;
    assert!(options.contains("1)"), "options: {}", options);
    assert!(options.contains("2)"), "options: {}", options);
    assert!(options.contains("Corte"), "options: {}", options);
    assert_eq!(current_state(&fx).await, "VALIDATE_BEFORE_CONFIRM");

    let confirmed = say(&fx, "1").await;
    assert!(confirmed.contains("Anotei"), "confirmed: {}", confirmed);
    assert!(confirmed.contains("Corte"), "confirmed: {}", confirmed);
    assert_eq!(current_state(&fx).await, "SCHEDULING_CONFIRMED");
}

#[tokio::test]
async fn s2_broad_category_is_rejected_without_booking() {
    let fx = fixture().await;

    say(&fx, "Oi").await;
    say(&fx, "1").await;

    let reply = say(&fx, "beleza").await;
    assert!(reply.contains("específico"), "reply: {}", reply);
    assert_eq!(current_state(&fx).await, "VALIDATE_BEFORE_CONFIRM");
}

#[tokio::test]
async fn s3_ambiguous_intent_asks_for_confirmation() {
    let fx = fixture().await;

    say(&fx, "Oi").await;
    let confirm = say(&fx, "agenda").await;
    assert!(confirm.contains("confirmar"), "confirm: {}", confirm);
    assert_eq!(current_state(&fx).await, "CONFIRM_INTENT");

    // Branch 1: user confirms scheduling.
    let clarify = say(&fx, "1").await;
    assert!(clarify.contains("serviço"), "clarify: {}", clarify);
    assert_eq!(current_state(&fx).await, "VALIDATE_BEFORE_CONFIRM");
}

#[tokio::test]
async fn s3_confirm_intent_option_two_routes_to_info() {
    let fx = fixture().await;

    say(&fx, "Oi").await;
    say(&fx, "agenda").await;
    let info = say(&fx, "2").await;
    assert!(info.contains("Funcionamos"), "info: {}", info);
    assert_eq!(current_state(&fx).await, "INFO_ROUTING");
}

#[tokio::test]
async fn s4_fragments_get_one_aggregated_reply() {
    let fx = fixture_with_window(Duration::from_millis(60)).await;

    let first = fx
        .controller
        .process_message("default", PHONE, "Quero agendar um", None)
        .await;
    assert_eq!(first.action, "buffered");
    assert!(first.reply.is_none());

    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = fx
        .controller
        .process_message("default", PHONE, "corte de cabelo", None)
        .await;
    assert_eq!(second.action, "buffered");

    // No outbound before the flush.
    assert!(fx.messenger.sent.lock().await.is_empty());

    tokio::time::sleep(Duration::from_millis(400)).await;

    let sent = fx.messenger.sent.lock().await;
    assert_eq!(sent.len(), 1, "exactly one reply after the flush");

    // The aggregated text reached the context history as a single message.
    let ctx = fx
        .controller
        .admin_get_context("default", PHONE)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        ctx["history"][0]["text"].as_str().unwrap(),
        "Quero agendar um corte de cabelo"
    );
}

#[tokio::test]
async fn s5_handoff_freezes_the_machine() {
    let fx = fixture().await;
    fx.handoff.activate("default", PHONE).await.unwrap();

    let response = fx
        .controller
        .process_message("default", PHONE, "Oi", None)
        .await;

    assert_eq!(response.action, "transfer_human");
    assert!(response.reply.unwrap().contains("atendente"));
    // No conversation context was created or advanced.
    assert!(fx
        .controller
        .admin_get_context("default", PHONE)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn corrupt_context_blob_resets_to_menu() {
    let fx = fixture().await;
    fx.store
        .set("conv:default:5511999999991", "{ not valid json", None)
        .await
        .unwrap();

    let reply = say(&fx, "Oi").await;
    assert!(reply.contains("Agendar"));
    assert_eq!(current_state(&fx).await, "MENU_WAITING");
}

#[tokio::test]
async fn invalid_menu_option_stays_in_menu() {
    let fx = fixture().await;
    say(&fx, "Oi").await;
    let reply = say(&fx, "banana frita").await;
    assert!(reply.contains("Não entendi"), "reply: {}", reply);
    assert_eq!(current_state(&fx).await, "MENU_WAITING");
}

#[tokio::test]
async fn explicit_request_from_menu_books_directly() {
    let fx = fixture().await;
    say(&fx, "Oi").await;

    // Explicit schedule intent with an exact service name goes straight
    // through validation into the confirmed state.
    let reply = say(&fx, "Quero agendar Escova Progressiva").await;
    assert!(reply.contains("Anotei"), "reply: {}", reply);
    assert!(reply.contains("Escova Progressiva"), "reply: {}", reply);
    assert_eq!(current_state(&fx).await, "SCHEDULING_CONFIRMED");
}
