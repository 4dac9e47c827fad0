use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, instrument};

use booking_cell::BookingProvider;

use crate::error::CatalogError;
use crate::models::DiffReport;
use crate::services::store::CatalogStore;

/// Daily reconciliation between the provider feed and the local mirror.
/// The mirror never deletes, so rows the provider dropped show up here as
/// phantoms until an operator decides what to do with them.
pub struct CatalogDiffService {
    provider: Arc<dyn BookingProvider>,
    catalog: Arc<CatalogStore>,
    page_size: u32,
}

impl CatalogDiffService {
    pub fn new(provider: Arc<dyn BookingProvider>, catalog: Arc<CatalogStore>, page_size: u32) -> Self {
        Self {
            provider,
            catalog,
            page_size,
        }
    }

    #[instrument(skip(self))]
    pub async fn daily_diff_report(&self, tenant: &str) -> Result<DiffReport, CatalogError> {
        // Full provider snapshot, unfiltered by watermark.
        let mut provider_keys: HashMap<(i64, i64), u32> = HashMap::new();
        let mut page: u32 = 1;
        loop {
            let services_page = self
                .provider
                .get_services_page(None, page, self.page_size)
                .await?;
            for service in &services_page.items {
                *provider_keys
                    .entry((service.service_id, service.professional_id))
                    .or_insert(0) += 1;
            }
            if !services_page.has_more {
                break;
            }
            page = services_page.next_page.unwrap_or(page + 1);
        }

        let local_rows = self.catalog.all_rows(tenant).await?;
        let local_keys: HashSet<(i64, i64)> = local_rows
            .iter()
            .map(|item| (item.service_id, item.professional_id))
            .collect();

        let missing_in_local = provider_keys
            .keys()
            .filter(|key| !local_keys.contains(key))
            .count();

        let phantoms: Vec<String> = local_rows
            .iter()
            .filter(|item| !provider_keys.contains_key(&(item.service_id, item.professional_id)))
            .map(|item| {
                format!(
                    "{} (service {} / professional {})",
                    item.service_name, item.service_id, item.professional_id
                )
            })
            .collect();

        let duplicates_detail: Vec<String> = provider_keys
            .iter()
            .filter(|(_, count)| **count > 1)
            .map(|((service_id, professional_id), count)| {
                format!(
                    "service {} / professional {} appeared {} times",
                    service_id, professional_id, count
                )
            })
            .collect();

        let report = DiffReport {
            tenant: tenant.to_string(),
            as_of: Utc::now(),
            total_provider: provider_keys.len(),
            total_local: local_rows.len(),
            missing_in_local,
            extra_in_local: phantoms.len(),
            duplicates: duplicates_detail.len(),
            phantoms,
            duplicates_detail,
        };

        info!(
            "Catalog diff for {}: provider={} local={} missing={} phantoms={}",
            tenant, report.total_provider, report.total_local, report.missing_in_local,
            report.extra_in_local
        );
        Ok(report)
    }
}
