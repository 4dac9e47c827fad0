use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use booking_cell::AppointmentAuditLog;
use shared_storage::KeyValueStore;
use shared_utils::normalize::normalize_text;

use crate::error::CatalogError;
use crate::models::{CatalogItem, ServiceSuggestion};

const SUGGESTION_LIMIT_MIN: usize = 1;
const SUGGESTION_LIMIT_MAX: usize = 10;

/// Optional read-only fallback queried once when the mirror has no match.
#[async_trait]
pub trait LegacyCatalogSource: Send + Sync {
    async fn search_suggestions(
        &self,
        tenant: &str,
        normalized_term: &str,
        limit: usize,
    ) -> Result<Vec<ServiceSuggestion>, CatalogError>;
}

type TenantIndex = HashMap<(i64, i64), CatalogItem>;

/// The searchable mirror of the provider catalog.
///
/// Reads run against the in-memory index; writes go through to the shared
/// store so a restarted instance can hydrate itself. Only Catalog Sync
/// writes; every read filters on `active AND visible`.
pub struct CatalogStore {
    store: Arc<dyn KeyValueStore>,
    audit: Arc<AppointmentAuditLog>,
    index: RwLock<HashMap<String, TenantIndex>>,
    legacy: Option<Arc<dyn LegacyCatalogSource>>,
}

impl CatalogStore {
    pub fn new(store: Arc<dyn KeyValueStore>, audit: Arc<AppointmentAuditLog>) -> Self {
        Self {
            store,
            audit,
            index: RwLock::new(HashMap::new()),
            legacy: None,
        }
    }

    pub fn with_legacy_source(mut self, legacy: Arc<dyn LegacyCatalogSource>) -> Self {
        self.legacy = Some(legacy);
        self
    }

    /// Loads every persisted row for `tenant` into the in-memory index.
    pub async fn hydrate(&self, tenant: &str) -> Result<usize, CatalogError> {
        let keys = self
            .store
            .scan_prefix(&format!("catalog:{}:", tenant))
            .await?;
        let mut loaded = 0;
        let mut index = self.index.write().await;
        let tenant_index = index.entry(tenant.to_string()).or_default();
        for key in keys {
            if let Some(raw) = self.store.get(&key).await? {
                let item: CatalogItem = serde_json::from_str(&raw)?;
                tenant_index.insert((item.service_id, item.professional_id), item);
                loaded += 1;
            }
        }
        info!("Hydrated {} catalog rows for tenant {}", loaded, tenant);
        Ok(loaded)
    }

    /// Idempotent write by `(tenant, service_id, professional_id)`. Never
    /// deletes; rows the provider dropped surface in the drift report.
    #[instrument(skip(self, items))]
    pub async fn upsert(&self, tenant: &str, items: Vec<CatalogItem>) -> Result<usize, CatalogError> {
        let mut written = 0;
        {
            let mut index = self.index.write().await;
            let tenant_index = index.entry(tenant.to_string()).or_default();
            for item in &items {
                tenant_index.insert((item.service_id, item.professional_id), item.clone());
            }
        }
        for item in &items {
            let serialized = serde_json::to_string(item)?;
            self.store.set(&item.storage_key(), &serialized, None).await?;
            written += 1;
        }
        debug!("Upserted {} catalog rows for tenant {}", written, tenant);
        Ok(written)
    }

    #[instrument(skip(self))]
    pub async fn search_suggestions(
        &self,
        tenant: &str,
        term: &str,
        limit: usize,
    ) -> Result<Vec<ServiceSuggestion>, CatalogError> {
        let limit = limit.clamp(SUGGESTION_LIMIT_MIN, SUGGESTION_LIMIT_MAX);
        let normalized_term = normalize_text(term);

        let index = self.index.read().await;
        let rows: Vec<&CatalogItem> = index
            .get(tenant)
            .map(|tenant_index| {
                tenant_index
                    .values()
                    .filter(|item| item.searchable())
                    .filter(|item| item.normalized_name.contains(&normalized_term))
                    .collect()
            })
            .unwrap_or_default();

        let mut suggestions = group_by_service(rows);
        sort_by_price_then_name(&mut suggestions);
        suggestions.truncate(limit);

        if suggestions.is_empty() {
            if let Some(legacy) = &self.legacy {
                debug!("Mirror empty for term, querying legacy source once");
                return legacy
                    .search_suggestions(tenant, &normalized_term, limit)
                    .await;
            }
        }

        Ok(suggestions)
    }

    /// `professional_id = None` matches any professional row.
    pub async fn exists_for_booking(
        &self,
        tenant: &str,
        service_id: i64,
        professional_id: Option<i64>,
    ) -> Result<bool, CatalogError> {
        let index = self.index.read().await;
        let Some(tenant_index) = index.get(tenant) else {
            return Ok(false);
        };
        Ok(tenant_index.values().any(|item| {
            item.searchable()
                && item.service_id == service_id
                && professional_id
                    .map(|pid| item.professional_id == pid)
                    .unwrap_or(true)
        }))
    }

    /// Most-booked services of a category over the last 30 days, for broad
    /// category queries ("cabelo") where plain text search is too wide.
    #[instrument(skip(self))]
    pub async fn top_n_by_category_30d(
        &self,
        tenant: &str,
        normalized_category: &str,
        n: usize,
    ) -> Result<Vec<ServiceSuggestion>, CatalogError> {
        let since = Utc::now() - Duration::days(30);
        let counts = self
            .audit
            .successful_bookings_by_service(tenant, since)
            .await?;

        let index = self.index.read().await;
        let rows: Vec<&CatalogItem> = index
            .get(tenant)
            .map(|tenant_index| {
                tenant_index
                    .values()
                    .filter(|item| item.searchable())
                    .filter(|item| item.normalized_category == normalized_category)
                    .collect()
            })
            .unwrap_or_default();

        let mut suggestions = group_by_service(rows);
        suggestions.sort_by(|a, b| {
            let count_a = counts.get(&a.service_id).copied().unwrap_or(0);
            let count_b = counts.get(&b.service_id).copied().unwrap_or(0);
            count_b.cmp(&count_a).then_with(|| a.name.cmp(&b.name))
        });
        suggestions.truncate(n.clamp(SUGGESTION_LIMIT_MIN, SUGGESTION_LIMIT_MAX));
        Ok(suggestions)
    }

    /// True iff the term names a category as-is and at least two distinct
    /// services live under it.
    pub async fn is_category_generic(&self, tenant: &str, term: &str) -> Result<bool, CatalogError> {
        let normalized_term = normalize_text(term);
        let index = self.index.read().await;
        let Some(tenant_index) = index.get(tenant) else {
            return Ok(false);
        };
        let mut distinct_services = std::collections::HashSet::new();
        for item in tenant_index.values() {
            if item.searchable() && item.normalized_category == normalized_term {
                distinct_services.insert(item.service_id);
            }
        }
        Ok(distinct_services.len() >= 2)
    }

    /// Collapsed view of one service (min name / duration / price across
    /// its professional rows), for booking payloads.
    pub async fn suggestion_for(
        &self,
        tenant: &str,
        service_id: i64,
    ) -> Result<Option<ServiceSuggestion>, CatalogError> {
        let index = self.index.read().await;
        let rows: Vec<&CatalogItem> = index
            .get(tenant)
            .map(|tenant_index| {
                tenant_index
                    .values()
                    .filter(|item| item.searchable() && item.service_id == service_id)
                    .collect()
            })
            .unwrap_or_default();
        Ok(group_by_service(rows).into_iter().next())
    }

    /// Normalized category of a service, when the mirror knows it.
    pub async fn normalized_category_of(
        &self,
        tenant: &str,
        service_id: i64,
    ) -> Result<Option<String>, CatalogError> {
        let index = self.index.read().await;
        Ok(index.get(tenant).and_then(|tenant_index| {
            tenant_index
                .values()
                .find(|item| item.service_id == service_id && item.searchable())
                .map(|item| item.normalized_category.clone())
        }))
    }

    /// All live rows for a tenant; the drift report walks this.
    pub async fn all_rows(&self, tenant: &str) -> Result<Vec<CatalogItem>, CatalogError> {
        let index = self.index.read().await;
        Ok(index
            .get(tenant)
            .map(|tenant_index| tenant_index.values().cloned().collect())
            .unwrap_or_default())
    }
}

/// Groups rows by service, picking the minimum name, duration and price the
/// way the original aggregation does.
fn group_by_service(rows: Vec<&CatalogItem>) -> Vec<ServiceSuggestion> {
    let mut grouped: HashMap<i64, ServiceSuggestion> = HashMap::new();
    for item in rows {
        grouped
            .entry(item.service_id)
            .and_modify(|s| {
                if item.service_name < s.name {
                    s.name = item.service_name.clone();
                }
                if item.duration_min < s.duration_min {
                    s.duration_min = item.duration_min;
                }
                s.price = match (s.price, item.price) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (Some(a), None) => Some(a),
                    (None, b) => b,
                };
            })
            .or_insert_with(|| ServiceSuggestion {
                service_id: item.service_id,
                name: item.service_name.clone(),
                duration_min: item.duration_min,
                price: item.price,
            });
    }
    grouped.into_values().collect()
}

fn sort_by_price_then_name(suggestions: &mut [ServiceSuggestion]) {
    suggestions.sort_by(|a, b| {
        let price_a = a.price.unwrap_or(f64::INFINITY);
        let price_b = b.price.unwrap_or(f64::INFINITY);
        price_a
            .partial_cmp(&price_b)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.name.cmp(&b.name))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use booking_cell::{AppointmentAttempt, AttemptStatus};
    use shared_storage::MemoryStore;

    fn item(service_id: i64, professional_id: i64, name: &str, category: &str, price: Option<f64>) -> CatalogItem {
        CatalogItem {
            tenant: "default".to_string(),
            service_id,
            professional_id,
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

    async fn store_with(items: Vec<CatalogItem>) -> CatalogStore {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let audit = Arc::new(AppointmentAuditLog::new(kv.clone()));
        let store = CatalogStore::new(kv, audit);
        store.upsert("default", items).await.unwrap();
        store
    }

    #[tokio::test]
    async fn search_filters_inactive_and_invisible() {
        let mut hidden = item(1, 0, "Corte Feminino", "Cabelo", Some(90.0));
        hidden.visible = false;
        let mut inactive = item(2, 0, "Corte Masculino", "Cabelo", Some(60.0));
        inactive.active = false;
        let store = store_with(vec![
            hidden,
            inactive,
            item(3, 0, "Corte Infantil", "Cabelo", Some(50.0)),
        ])
        .await;

        let results = store.search_suggestions("default", "corte", 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].service_id, 3);
    }

    #[tokio::test]
    async fn search_orders_by_price_asc_nulls_last_then_name() {
        let store = store_with(vec![
            item(1, 0, "Banho de Lua", "Corpo", None),
            item(2, 0, "Hidratacao", "Cabelo", Some(90.0)),
            item(3, 0, "Chapinha", "Cabelo", Some(50.0)),
            item(4, 0, "Aplicacao de Ampola", "Cabelo", Some(50.0)),
        ])
        .await;

        let results = store.search_suggestions("default", "a", 10).await.unwrap();
        let names: Vec<&str> = results.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["Aplicacao de Ampola", "Chapinha", "Hidratacao", "Banho de Lua"]
        );
    }

    #[tokio::test]
    async fn search_groups_professional_rows_by_service() {
        let store = store_with(vec![
            item(1, 10, "Corte Feminino", "Cabelo", Some(120.0)),
            item(1, 11, "Corte Feminino", "Cabelo", Some(90.0)),
            item(1, 0, "Corte Feminino", "Cabelo", None),
        ])
        .await;

        let results = store.search_suggestions("default", "corte", 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].price, Some(90.0));
    }

    #[tokio::test]
    async fn search_clamps_limit_to_valid_range() {
        let items: Vec<CatalogItem> = (1..=15)
            .map(|i| item(i, 0, &format!("Servico {:02}", i), "Geral", Some(i as f64)))
            .collect();
        let store = store_with(items).await;

        let zero = store.search_suggestions("default", "servico", 0).await.unwrap();
        assert_eq!(zero.len(), 1);

        let hundred = store.search_suggestions("default", "servico", 100).await.unwrap();
        assert_eq!(hundred.len(), 10);
    }

    #[tokio::test]
    async fn search_normalizes_the_query() {
        let store = store_with(vec![item(1, 0, "Coloração", "Cabelo", Some(150.0))]).await;
        let results = store.search_suggestions("default", "COLORAÇÃO", 5).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn upsert_is_idempotent_by_triple() {
        let store = store_with(vec![item(1, 0, "Corte", "Cabelo", Some(80.0))]).await;
        store
            .upsert("default", vec![item(1, 0, "Corte", "Cabelo", Some(85.0))])
            .await
            .unwrap();

        let rows = store.all_rows("default").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].price, Some(85.0));
    }

    #[tokio::test]
    async fn exists_for_booking_matches_any_professional_when_unspecified() {
        let store = store_with(vec![item(1, 7, "Corte", "Cabelo", Some(80.0))]).await;
        assert!(store.exists_for_booking("default", 1, None).await.unwrap());
        assert!(store.exists_for_booking("default", 1, Some(7)).await.unwrap());
        assert!(!store.exists_for_booking("default", 1, Some(9)).await.unwrap());
        assert!(!store.exists_for_booking("default", 2, None).await.unwrap());
    }

    #[tokio::test]
    async fn category_generic_requires_two_distinct_services() {
        let store = store_with(vec![
            item(1, 0, "Corte Feminino", "Cabelo", Some(90.0)),
            item(2, 0, "Escova", "Cabelo", Some(70.0)),
            item(3, 0, "Manicure", "Unhas", Some(40.0)),
        ])
        .await;

        assert!(store.is_category_generic("default", "cabelo").await.unwrap());
        assert!(!store.is_category_generic("default", "unhas").await.unwrap());
        assert!(!store.is_category_generic("default", "corte feminino").await.unwrap());
    }

    #[tokio::test]
    async fn top_by_category_ranks_by_recent_bookings() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let audit = Arc::new(AppointmentAuditLog::new(kv.clone()));
        let store = CatalogStore::new(kv, audit.clone());
        store
            .upsert(
                "default",
                vec![
                    item(1, 0, "Corte Feminino", "Cabelo", Some(90.0)),
                    item(2, 0, "Escova", "Cabelo", Some(70.0)),
                    item(3, 0, "Hidratacao", "Cabelo", Some(60.0)),
                ],
            )
            .await
            .unwrap();

        for _ in 0..3 {
            audit
                .record(&AppointmentAttempt {
                    tenant: "default".to_string(),
                    phone: "5511999999999".to_string(),
                    service_id: 2,
                    professional_id: None,
                    start_iso: "2031-01-01T10:00:00Z".to_string(),
                    idempotency_key: format!("k{}", rand_suffix()),
                    request_payload: serde_json::json!({}),
                    response_payload: None,
                    provider_appointment_id: Some(1),
                    status: AttemptStatus::Success,
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let top = store.top_n_by_category_30d("default", "cabelo", 2).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].service_id, 2);
    }

    #[tokio::test]
    async fn hydrate_restores_index_from_store() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let audit = Arc::new(AppointmentAuditLog::new(kv.clone()));
        {
            let store = CatalogStore::new(kv.clone(), audit.clone());
            store
                .upsert("default", vec![item(1, 0, "Corte", "Cabelo", Some(80.0))])
                .await
                .unwrap();
        }

        let fresh = CatalogStore::new(kv, audit);
        assert_eq!(fresh.hydrate("default").await.unwrap(), 1);
        assert!(fresh.exists_for_booking("default", 1, None).await.unwrap());
    }

    struct FixedLegacy;

    #[async_trait]
    impl LegacyCatalogSource for FixedLegacy {
        async fn search_suggestions(
            &self,
            _tenant: &str,
            normalized_term: &str,
            _limit: usize,
        ) -> Result<Vec<ServiceSuggestion>, CatalogError> {
            if normalized_term == "alongamento" {
                Ok(vec![ServiceSuggestion {
                    service_id: 900,
                    name: "Alongamento de Unhas".to_string(),
                    duration_min: 90,
                    price: Some(150.0),
                }])
            } else {
                Ok(Vec::new())
            }
        }
    }

    #[tokio::test]
    async fn legacy_source_answers_only_when_mirror_is_empty() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let audit = Arc::new(AppointmentAuditLog::new(kv.clone()));
        let store =
            CatalogStore::new(kv, audit).with_legacy_source(Arc::new(FixedLegacy));
        store
            .upsert("default", vec![item(1, 0, "Corte", "Cabelo", Some(80.0))])
            .await
            .unwrap();

        // Mirror hit: legacy never consulted.
        let local = store.search_suggestions("default", "corte", 5).await.unwrap();
        assert_eq!(local[0].service_id, 1);

        // Mirror miss: a single legacy query with identical semantics.
        let legacy = store
            .search_suggestions("default", "Alongamento", 5)
            .await
            .unwrap();
        assert_eq!(legacy.len(), 1);
        assert_eq!(legacy[0].service_id, 900);
    }

    static COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

    fn rand_suffix() -> u64 {
        COUNTER.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }
}
