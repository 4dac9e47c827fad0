use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use booking_cell::ProviderService;
use shared_utils::normalize::normalize_text;

/// Local mirror row for one `(tenant, service_id, professional_id)` triple.
/// `professional_id` 0 means "any professional".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogItem {
    pub tenant: String,
    pub service_id: i64,
    pub professional_id: i64,
    pub service_name: String,
    pub normalized_name: String,
    pub category: String,
    pub normalized_category: String,
    pub duration_min: i32,
    pub price: Option<f64>,
    pub visible: bool,
    pub active: bool,
    pub last_synced_at: DateTime<Utc>,
}

impl CatalogItem {
    pub fn from_provider(tenant: &str, service: &ProviderService) -> Self {
        Self {
            tenant: tenant.to_string(),
            service_id: service.service_id,
            professional_id: service.professional_id,
            service_name: service.nome.clone(),
            normalized_name: normalize_text(&service.nome),
            category: service.categoria.clone(),
            normalized_category: normalize_text(&service.categoria),
            duration_min: service.duracao_em_minutos,
            price: service.preco,
            visible: service.visivel_para_cliente,
            active: service.ativo,
            last_synced_at: Utc::now(),
        }
    }

    pub fn searchable(&self) -> bool {
        self.active && self.visible
    }

    pub fn storage_key(&self) -> String {
        Self::key(&self.tenant, self.service_id, self.professional_id)
    }

    pub fn key(tenant: &str, service_id: i64, professional_id: i64) -> String {
        format!("catalog:{}:{}:{}", tenant, service_id, professional_id)
    }
}

/// What disambiguation shows the user for one candidate service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceSuggestion {
    pub service_id: i64,
    pub name: String,
    pub duration_min: i32,
    pub price: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub ok: bool,
    pub new_watermark: Option<String>,
    pub pages_fetched: u32,
    pub items_upserted: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffReport {
    pub tenant: String,
    pub as_of: DateTime<Utc>,
    pub total_provider: usize,
    pub total_local: usize,
    pub missing_in_local: usize,
    pub extra_in_local: usize,
    pub duplicates: usize,
    /// Local rows the provider no longer knows about.
    pub phantoms: Vec<String>,
    /// Triples the provider feed repeated.
    pub duplicates_detail: Vec<String>,
}
