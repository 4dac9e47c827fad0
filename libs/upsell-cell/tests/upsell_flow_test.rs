use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use booking_cell::{
    AppointmentAuditLog, AppointmentResponse, AvailabilityResult, BookingError, BookingProvider,
    CreateAppointmentRequest, ProviderClient, ServicesPage,
};
use catalog_cell::{CatalogItem, CatalogStore};
use channel_cell::{ChannelError, OutboundMessenger};
use shared_storage::{KeyValueStore, MemoryStore};
use shared_utils::normalize::normalize_text;
use upsell_cell::{
    AddonRecommender, BookingConfirmed, CopyVariant, JobStatus, PositionVariant, UpsellConfig,
    UpsellEventKind, UpsellEventLog, UpsellJobStore, UpsellScheduler, UpsellWorker, Variant,
};

#[derive(Default)]
struct RecordingMessenger {
    sent: Mutex<Vec<(String, String)>>,
    fail: std::sync::atomic::AtomicBool,
}

#[async_trait]
impl OutboundMessenger for RecordingMessenger {
    async fn send_text(&self, phone: &str, text: &str) -> Result<(), ChannelError> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(ChannelError::RetriesExhausted("gateway down".to_string()));
        }
        self.sent
            .lock()
            .await
            .push((phone.to_string(), text.to_string()));
        Ok(())
    }
}

#[derive(Default)]
struct StubProvider {
    appended: Mutex<Vec<(i64, i64)>>,
}

#[async_trait]
impl BookingProvider for StubProvider {
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
        unimplemented!()
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
        appointment_id: i64,
        addon_service_id: i64,
    ) -> Result<(), BookingError> {
        self.appended
            .lock()
            .await
            .push((appointment_id, addon_service_id));
        Ok(())
    }
}

fn item(service_id: i64, name: &str, price: Option<f64>) -> CatalogItem {
    CatalogItem {
        tenant: "default".to_string(),
        service_id,
        professional_id: 0,
        service_name: name.to_string(),
        normalized_name: normalize_text(name),
        category: "Cabelo".to_string(),
        normalized_category: "cabelo".to_string(),
        duration_min: 30,
        price,
        visible: true,
        active: true,
        last_synced_at: Utc::now(),
    }
}

struct Fixture {
    scheduler: Arc<UpsellScheduler>,
    events: Arc<UpsellEventLog>,
    jobs: Arc<UpsellJobStore>,
    messenger: Arc<RecordingMessenger>,
    provider: Arc<StubProvider>,
}

async fn fixture(config: UpsellConfig) -> Fixture {
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let audit = Arc::new(AppointmentAuditLog::new(kv.clone()));
    let catalog = Arc::new(CatalogStore::new(kv.clone(), audit));
    catalog
        .upsert(
            "default",
            vec![
                item(1, "Corte Feminino", Some(90.0)),
                item(7, "Hidratacao Expressa", Some(35.0)),
            ],
        )
        .await
        .unwrap();

    let events = Arc::new(UpsellEventLog::new(kv.clone()));
    let jobs = Arc::new(UpsellJobStore::new(kv.clone()));
    let messenger = Arc::new(RecordingMessenger::default());
    let provider = Arc::new(StubProvider::default());

    let scheduler = Arc::new(UpsellScheduler::new(
        config,
        Arc::new(AddonRecommender::new(catalog)),
        events.clone(),
        jobs.clone(),
        messenger.clone(),
        provider.clone(),
    ));

    Fixture {
        scheduler,
        events,
        jobs,
        messenger,
        provider,
    }
}

fn config() -> UpsellConfig {
    UpsellConfig {
        enabled: true,
        delay_min: 10,
        copy_a_weight: 0.5,
        pos_immediate_weight: 0.5,
        max_attempts: 3,
        retry_delay_min: 5,
    }
}

fn booking() -> BookingConfirmed {
    BookingConfirmed {
        tenant: "default".to_string(),
        conversation_id: "conv-1".to_string(),
        phone: "5511999999999".to_string(),
        appointment_id: 501,
        primary_service_id: 1,
    }
}

fn forced(copy: CopyVariant, position: PositionVariant) -> Option<Variant> {
    Some(Variant { copy, position })
}

async fn shown_count(events: &UpsellEventLog) -> usize {
    events
        .events_for_tenant("default")
        .await
        .unwrap()
        .iter()
        .filter(|e| e.event == UpsellEventKind::Shown)
        .count()
}

#[tokio::test]
async fn s6_immediate_offer_accept_and_replay() {
    let fx = fixture(config()).await;

    // Forced (A, IMMEDIATE) offer after the confirmed booking.
    let outcome = fx
        .scheduler
        .on_booking_confirmed(booking(), forced(CopyVariant::A, PositionVariant::Immediate))
        .await
        .unwrap();
    assert_eq!(outcome, UpsellEventKind::Shown);

    // Exactly one shown event; the outbound names the addon with duration
    // and price.
    assert_eq!(shown_count(&fx.events).await, 1);
    {
        let sent = fx.messenger.sent.lock().await;
        assert_eq!(sent.len(), 1);
        let text = &sent[0].1;
        assert!(text.contains("Hidratacao Expressa"), "offer: {}", text);
        assert!(text.contains("30"), "offer: {}", text);
        assert!(text.contains("R$ 35,00"), "offer: {}", text);
    }

    // "1" accepts: confirm reply, accepted event, provider call.
    let reply = fx
        .scheduler
        .interpret_reply(&booking(), "1")
        .await
        .unwrap()
        .expect("accept intercepted");
    assert!(reply.contains("Adicionei"), "reply: {}", reply);
    assert_eq!(fx.provider.appended.lock().await.as_slice(), &[(501, 7)]);

    let state = fx.events.conversation_state("conv-1").await.unwrap();
    assert!(state.has_shown);
    assert_eq!(state.last_event, Some(UpsellEventKind::Accepted));

    // Replaying the confirmation never yields a second shown event.
    fx.scheduler
        .on_booking_confirmed(booking(), forced(CopyVariant::A, PositionVariant::Immediate))
        .await
        .unwrap();
    assert_eq!(shown_count(&fx.events).await, 1);
}

#[tokio::test]
async fn decline_is_recorded_and_wins_over_accept_words() {
    let fx = fixture(config()).await;
    fx.scheduler
        .on_booking_confirmed(booking(), forced(CopyVariant::B, PositionVariant::Immediate))
        .await
        .unwrap();

    let reply = fx
        .scheduler
        .interpret_reply(&booking(), "não quero")
        .await
        .unwrap()
        .expect("decline intercepted");
    assert!(reply.contains("próxima"), "reply: {}", reply);

    let state = fx.events.conversation_state("conv-1").await.unwrap();
    assert_eq!(state.last_event, Some(UpsellEventKind::Declined));
}

#[tokio::test]
async fn unrelated_text_is_not_intercepted() {
    let fx = fixture(config()).await;
    fx.scheduler
        .on_booking_confirmed(booking(), forced(CopyVariant::A, PositionVariant::Immediate))
        .await
        .unwrap();

    let reply = fx
        .scheduler
        .interpret_reply(&booking(), "qual o endereço de vocês?")
        .await
        .unwrap();
    assert!(reply.is_none());
}

#[tokio::test]
async fn no_interception_before_an_offer_was_shown() {
    let fx = fixture(config()).await;
    let reply = fx.scheduler.interpret_reply(&booking(), "1").await.unwrap();
    assert!(reply.is_none());
}

#[tokio::test]
async fn delay_variant_schedules_a_job_and_worker_delivers_it() {
    let fx = fixture(config()).await;

    let outcome = fx
        .scheduler
        .on_booking_confirmed(booking(), forced(CopyVariant::A, PositionVariant::Delay10))
        .await
        .unwrap();
    assert_eq!(outcome, UpsellEventKind::Scheduled);
    assert!(fx.messenger.sent.lock().await.is_empty());

    // Make the job ripe, then run one worker sweep.
    let mut job = fx.jobs.all().await.unwrap().pop().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    job.scheduled_for = Utc::now() - ChronoDuration::minutes(1);
    fx.jobs.save(&job).await.unwrap();

    let worker = Arc::new(UpsellWorker::new(
        fx.scheduler.clone(),
        Duration::from_secs(60),
        5,
    ));
    let processed = worker.run_once().await.unwrap();
    assert_eq!(processed, 1);

    assert_eq!(fx.messenger.sent.lock().await.len(), 1);
    assert_eq!(shown_count(&fx.events).await, 1);
    assert_eq!(
        fx.jobs.get(&job.id).await.unwrap().unwrap().status,
        JobStatus::Completed
    );
}

#[tokio::test]
async fn failed_delivery_reschedules_until_attempts_run_out() {
    let fx = fixture(config()).await;
    fx.messenger
        .fail
        .store(true, std::sync::atomic::Ordering::SeqCst);

    fx.scheduler
        .on_booking_confirmed(booking(), forced(CopyVariant::A, PositionVariant::Delay10))
        .await
        .unwrap();

    let worker = Arc::new(UpsellWorker::new(
        fx.scheduler.clone(),
        Duration::from_secs(60),
        5,
    ));

    for expected_attempts in 1..=3u32 {
        let mut job = fx.jobs.all().await.unwrap().pop().unwrap();
        job.scheduled_for = Utc::now() - ChronoDuration::minutes(1);
        job.status = JobStatus::Pending;
        fx.jobs.save(&job).await.unwrap();

        worker.run_once().await.unwrap();
        let job = fx.jobs.all().await.unwrap().pop().unwrap();
        assert_eq!(job.attempts, expected_attempts);
        if expected_attempts < 3 {
            assert_eq!(job.status, JobStatus::Pending);
            assert!(job.last_error.is_some());
        } else {
            assert_eq!(job.status, JobStatus::Failed);
        }
    }
}

#[tokio::test]
async fn nothing_to_offer_when_no_addon_exists() {
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let audit = Arc::new(AppointmentAuditLog::new(kv.clone()));
    let catalog = Arc::new(CatalogStore::new(kv.clone(), audit));
    // Only the primary service, no sibling to offer.
    catalog
        .upsert("default", vec![item(1, "Corte Feminino", Some(90.0))])
        .await
        .unwrap();

    let events = Arc::new(UpsellEventLog::new(kv.clone()));
    let scheduler = Arc::new(UpsellScheduler::new(
        config(),
        Arc::new(AddonRecommender::new(catalog)),
        events.clone(),
        Arc::new(UpsellJobStore::new(kv)),
        Arc::new(RecordingMessenger::default()),
        Arc::new(StubProvider::default()),
    ));

    let outcome = scheduler
        .on_booking_confirmed(booking(), None)
        .await
        .unwrap();
    assert_eq!(outcome, UpsellEventKind::NothingToOffer);

    let counters = events.counters("default").await.unwrap();
    assert_eq!(counters.get("nothing_to_offer"), Some(&1));
}

#[tokio::test]
async fn disabled_scheduler_stays_silent() {
    let mut cfg = config();
    cfg.enabled = false;
    let fx = fixture(cfg).await;

    let outcome = fx
        .scheduler
        .on_booking_confirmed(booking(), None)
        .await
        .unwrap();
    assert_eq!(outcome, UpsellEventKind::NothingToOffer);
    assert!(fx.messenger.sent.lock().await.is_empty());
    assert!(fx.events.events_for_tenant("default").await.unwrap().is_empty());
}
