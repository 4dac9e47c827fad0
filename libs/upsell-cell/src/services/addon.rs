use std::sync::Arc;
use tracing::debug;

use catalog_cell::CatalogStore;

use crate::error::UpsellError;
use crate::models::Addon;

/// Picks the add-on to offer after a confirmed booking: the cheapest other
/// service in the primary's own category. Same chair, same visit, small
/// ticket — the only kind of offer that converts in chat.
pub struct AddonRecommender {
    catalog: Arc<CatalogStore>,
}

impl AddonRecommender {
    pub fn new(catalog: Arc<CatalogStore>) -> Self {
        Self { catalog }
    }

    pub async fn recommended_addon(
        &self,
        tenant: &str,
        primary_service_id: i64,
    ) -> Result<Option<Addon>, UpsellError> {
        let category = match self
            .catalog
            .normalized_category_of(tenant, primary_service_id)
            .await
            .map_err(|e| UpsellError::Catalog(e.to_string()))?
        {
            Some(category) if !category.is_empty() => category,
            _ => return Ok(None),
        };

        let candidates = self
            .catalog
            .top_n_by_category_30d(tenant, &category, 10)
            .await
            .map_err(|e| UpsellError::Catalog(e.to_string()))?;

        let addon = candidates
            .into_iter()
            .filter(|s| s.service_id != primary_service_id)
            .min_by(|a, b| {
                let pa = a.price.unwrap_or(f64::INFINITY);
                let pb = b.price.unwrap_or(f64::INFINITY);
                pa.partial_cmp(&pb).unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|s| Addon {
                service_id: s.service_id,
                nome: s.name,
                duracao: s.duration_min,
                preco: s.price,
            });

        debug!(
            "Addon recommendation for service {}: {:?}",
            primary_service_id,
            addon.as_ref().map(|a| a.service_id)
        );
        Ok(addon)
    }
}
