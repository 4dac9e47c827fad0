use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use booking_cell::BookingProvider;
use shared_storage::KeyValueStore;

use crate::error::CatalogError;
use crate::models::{CatalogItem, SyncOutcome};
use crate::services::store::CatalogStore;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub page_size: u32,
    pub lock_ttl: Duration,
    /// Operator override for the start watermark, ahead of the persisted one.
    pub watermark_override: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            lock_ttl: Duration::from_secs(3600),
            watermark_override: None,
        }
    }
}

/// Incremental catalog pull: pages filtered by `updated_since`, normalized,
/// upserted, watermark advanced only on a complete run.
pub struct CatalogSyncService {
    provider: Arc<dyn BookingProvider>,
    catalog: Arc<CatalogStore>,
    store: Arc<dyn KeyValueStore>,
    config: SyncConfig,
}

impl CatalogSyncService {
    pub fn new(
        provider: Arc<dyn BookingProvider>,
        catalog: Arc<CatalogStore>,
        store: Arc<dyn KeyValueStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            provider,
            catalog,
            store,
            config,
        }
    }

    /// Single-flight per tenant: a second trigger while one run is active
    /// fails fast with `SyncInProgress`.
    #[instrument(skip(self))]
    pub async fn trigger_full_sync(
        &self,
        tenant: &str,
        since_iso: Option<String>,
    ) -> Result<SyncOutcome, CatalogError> {
        let lock_key = format!("sync:lock:{}", tenant);
        let acquired = self
            .store
            .set_nx(&lock_key, "1", Some(self.config.lock_ttl))
            .await?;
        if !acquired {
            warn!("Catalog sync already running for tenant {}", tenant);
            return Err(CatalogError::SyncInProgress(tenant.to_string()));
        }

        let result = self.run_sync(tenant, since_iso).await;

        // Release the lock even on a failed run; the watermark did not move.
        self.store.delete(&lock_key).await?;
        result
    }

    async fn run_sync(
        &self,
        tenant: &str,
        since_iso: Option<String>,
    ) -> Result<SyncOutcome, CatalogError> {
        let start = self.resolve_start(tenant, since_iso).await?;
        info!("Catalog sync for tenant {} starting from {}", tenant, start);
        metrics::counter!("catalog_sync_runs_total").increment(1);

        let mut page: u32 = 1;
        let mut pages_fetched: u32 = 0;
        let mut items_upserted: usize = 0;
        let mut max_updated_at: Option<DateTime<Utc>> = None;

        loop {
            let services_page = self
                .provider
                .get_services_page(Some(start), page, self.config.page_size)
                .await?;
            pages_fetched += 1;

            let items: Vec<CatalogItem> = services_page
                .items
                .iter()
                .map(|service| CatalogItem::from_provider(tenant, service))
                .collect();

            for service in &services_page.items {
                if let Some(updated) = service.updated_at {
                    max_updated_at = Some(match max_updated_at {
                        Some(current) => current.max(updated),
                        None => updated,
                    });
                }
            }

            items_upserted += self.catalog.upsert(tenant, items).await?;

            if !services_page.has_more {
                break;
            }
            page = services_page.next_page.unwrap_or(page + 1);
        }

        // The watermark moves only after the whole run succeeded; a partial
        // run keeps its upserts and retries from the old cursor.
        let new_watermark = max_updated_at.map(|dt| dt.to_rfc3339());
        if let Some(watermark) = &new_watermark {
            self.persist_watermark(tenant, watermark).await?;
        }

        info!(
            "Catalog sync for tenant {} done: {} pages, {} rows",
            tenant, pages_fetched, items_upserted
        );

        Ok(SyncOutcome {
            ok: true,
            new_watermark,
            pages_fetched,
            items_upserted,
        })
    }

    /// Start = explicit `since` ?? configured override ?? persisted
    /// watermark ?? epoch. The watermark never moves backwards on its own.
    async fn resolve_start(
        &self,
        tenant: &str,
        since_iso: Option<String>,
    ) -> Result<DateTime<Utc>, CatalogError> {
        let candidate = match since_iso.or_else(|| self.config.watermark_override.clone()) {
            Some(raw) => Some(raw),
            None => self.store.get(&watermark_key(tenant)).await?,
        };

        Ok(candidate
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().unwrap_or_else(Utc::now)))
    }

    async fn persist_watermark(&self, tenant: &str, watermark: &str) -> Result<(), CatalogError> {
        let current = self.store.get(&watermark_key(tenant)).await?;
        let advance = match current
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        {
            Some(existing) => DateTime::parse_from_rfc3339(watermark)
                .map(|new| new > existing)
                .unwrap_or(false),
            None => true,
        };
        if advance {
            self.store.set(&watermark_key(tenant), watermark, None).await?;
        }
        Ok(())
    }

    pub async fn current_watermark(&self, tenant: &str) -> Result<Option<String>, CatalogError> {
        Ok(self.store.get(&watermark_key(tenant)).await?)
    }
}

fn watermark_key(tenant: &str) -> String {
    format!("sync:watermark:{}", tenant)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use booking_cell::{
        AppointmentAuditLog, AppointmentResponse, AvailabilityResult, BookingError,
        CreateAppointmentRequest, ProviderClient, ProviderService, ServicesPage,
    };
    use shared_storage::MemoryStore;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct PagedProvider {
        pages: Vec<ServicesPage>,
        calls: AtomicU32,
    }

    impl PagedProvider {
        fn new(pages: Vec<ServicesPage>) -> Self {
            Self {
                pages,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl BookingProvider for PagedProvider {
        async fn get_services_page(
            &self,
            _updated_since: Option<DateTime<Utc>>,
            page: u32,
            _limit: u32,
        ) -> Result<ServicesPage, BookingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.pages
                .get((page - 1) as usize)
                .cloned()
                .ok_or_else(|| BookingError::ProviderUnavailable("page out of range".to_string()))
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
            _appointment_id: i64,
            _addon_service_id: i64,
        ) -> Result<(), BookingError> {
            unimplemented!()
        }
    }

    fn service(id: i64, nome: &str, updated_at: &str) -> ProviderService {
        ProviderService {
            service_id: id,
            professional_id: 0,
            nome: nome.to_string(),
            categoria: "Cabelo".to_string(),
            duracao_em_minutos: 60,
            preco: Some(80.0),
            visivel_para_cliente: true,
            ativo: true,
            updated_at: DateTime::parse_from_rfc3339(updated_at)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }

    fn fixture(pages: Vec<ServicesPage>) -> (CatalogSyncService, Arc<CatalogStore>, Arc<dyn KeyValueStore>) {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let audit = Arc::new(AppointmentAuditLog::new(kv.clone()));
        let catalog = Arc::new(CatalogStore::new(kv.clone(), audit));
        let sync = CatalogSyncService::new(
            Arc::new(PagedProvider::new(pages)),
            catalog.clone(),
            kv.clone(),
            SyncConfig::default(),
        );
        (sync, catalog, kv)
    }

    #[tokio::test]
    async fn sync_walks_pages_and_persists_watermark() {
        let (sync, catalog, _kv) = fixture(vec![
            ServicesPage {
                items: vec![
                    service(1, "Corte Feminino", "2031-01-01T00:00:00Z"),
                    service(2, "Escova", "2031-01-02T00:00:00Z"),
                ],
                has_more: true,
                next_page: Some(2),
            },
            ServicesPage {
                items: vec![service(3, "Coloração", "2031-01-03T00:00:00Z")],
                has_more: false,
                next_page: None,
            },
        ]);

        let outcome = sync.trigger_full_sync("default", None).await.unwrap();
        assert!(outcome.ok);
        assert_eq!(outcome.pages_fetched, 2);
        assert_eq!(outcome.items_upserted, 3);
        assert_eq!(
            outcome.new_watermark.as_deref(),
            Some("2031-01-03T00:00:00+00:00")
        );

        // Normalization happened on ingest.
        let results = catalog.search_suggestions("default", "coloracao", 5).await.unwrap();
        assert_eq!(results.len(), 1);

        assert_eq!(
            sync.current_watermark("default").await.unwrap().as_deref(),
            Some("2031-01-03T00:00:00+00:00")
        );
    }

    #[tokio::test]
    async fn second_sync_fails_fast_while_lock_held() {
        let (sync, _catalog, kv) = fixture(vec![ServicesPage {
            items: vec![],
            has_more: false,
            next_page: None,
        }]);

        kv.set_nx("sync:lock:default", "1", None).await.unwrap();
        let result = sync.trigger_full_sync("default", None).await;
        assert!(matches!(result, Err(CatalogError::SyncInProgress(_))));
    }

    #[tokio::test]
    async fn failed_run_keeps_old_watermark_and_releases_lock() {
        let (sync, _catalog, kv) = fixture(vec![ServicesPage {
            items: vec![service(1, "Corte", "2031-02-01T00:00:00Z")],
            has_more: true,
            // Points past the fixture, so page 2 errors out mid-run.
            next_page: Some(9),
        }]);

        kv.set("sync:watermark:default", "2031-01-01T00:00:00+00:00", None)
            .await
            .unwrap();

        let result = sync.trigger_full_sync("default", None).await;
        assert!(result.is_err());
        assert_eq!(
            sync.current_watermark("default").await.unwrap().as_deref(),
            Some("2031-01-01T00:00:00+00:00")
        );
        // Lock released, a retry may start immediately.
        assert!(kv.set_nx("sync:lock:default", "1", None).await.unwrap());
    }
}
