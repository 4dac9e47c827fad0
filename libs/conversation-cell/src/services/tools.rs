use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use booking_cell::AvailabilityService;
use catalog_cell::{CatalogStore, ServiceSuggestion};

use crate::error::ConversationError;

/// A named capability the state graph may `call_tool`.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    async fn call(&self, tenant: &str, args: &Value) -> Result<Value, ConversationError>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<&'static str, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.insert(tool.name(), tool);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub async fn call(
        &self,
        name: &str,
        tenant: &str,
        args: &Value,
    ) -> Result<Value, ConversationError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ConversationError::UnknownTool(name.to_string()))?;
        debug!("Calling tool {}", name);
        tool.call(tenant, args).await
    }
}

/// `catalog.search_top_services(query, limit)` — suggestion list plus a
/// pre-rendered pt-BR listing for the clarify template.
pub struct SearchTopServicesTool {
    catalog: Arc<CatalogStore>,
}

impl SearchTopServicesTool {
    pub fn new(catalog: Arc<CatalogStore>) -> Self {
        Self { catalog }
    }

    fn format(suggestions: &[ServiceSuggestion]) -> String {
        suggestions
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let price = match s.price {
                    Some(p) => format!("R$ {:.2}", p).replace('.', ","),
                    None => "valor sob consulta".to_string(),
                };
                format!("{}) {} – {} min – {}", i + 1, s.name, s.duration_min, price)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl Tool for SearchTopServicesTool {
    fn name(&self) -> &'static str {
        "catalog.search_top_services"
    }

    async fn call(&self, tenant: &str, args: &Value) -> Result<Value, ConversationError> {
        let query = args.get("query").and_then(Value::as_str).unwrap_or_default();
        let limit = args.get("limit").and_then(value_as_u64).unwrap_or(3) as usize;

        let mut suggestions = self
            .catalog
            .search_suggestions(tenant, query, limit)
            .await
            .map_err(|e| ConversationError::ToolCall(e.to_string()))?;

        // A bare category name rarely appears inside service names; rank the
        // category by recent bookings instead.
        if suggestions.is_empty() {
            let generic = self
                .catalog
                .is_category_generic(tenant, query)
                .await
                .map_err(|e| ConversationError::ToolCall(e.to_string()))?;
            if generic {
                suggestions = self
                    .catalog
                    .top_n_by_category_30d(tenant, &shared_utils::normalize::normalize_text(query), limit)
                    .await
                    .map_err(|e| ConversationError::ToolCall(e.to_string()))?;
            }
        }

        Ok(json!({
            "items": suggestions,
            "formatted": Self::format(&suggestions),
        }))
    }
}

/// `trinks.validate_availability(service_id, professional_id?, start_iso)`.
/// Suggested alternative slots are rendered in the salon's timezone so the
/// clarify reply can show them directly.
pub struct ValidateAvailabilityTool {
    availability: Arc<AvailabilityService>,
    timezone: chrono_tz::Tz,
}

impl ValidateAvailabilityTool {
    pub fn new(availability: Arc<AvailabilityService>, timezone: chrono_tz::Tz) -> Self {
        Self {
            availability,
            timezone,
        }
    }

    fn format_suggestions(&self, suggested_times: &[String]) -> String {
        suggested_times
            .iter()
            .filter_map(|raw| chrono::DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| {
                dt.with_timezone(&self.timezone)
                    .format("%d/%m às %H:%M")
                    .to_string()
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[async_trait]
impl Tool for ValidateAvailabilityTool {
    fn name(&self) -> &'static str {
        "trinks.validate_availability"
    }

    async fn call(&self, _tenant: &str, args: &Value) -> Result<Value, ConversationError> {
        let service_id = args
            .get("service_id")
            .and_then(value_as_i64)
            .ok_or_else(|| ConversationError::ToolCall("service_id is required".to_string()))?;
        let professional_id = args.get("professional_id").and_then(value_as_i64);
        let start_iso = args
            .get("start_iso")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let result = self
            .availability
            .validate(service_id, professional_id, start_iso)
            .await
            .map_err(|e| ConversationError::ToolCall(e.to_string()))?;

        let formatted = self.format_suggestions(&result.suggested_times);
        let mut value = serde_json::to_value(result).map_err(ConversationError::from)?;
        if let Some(map) = value.as_object_mut() {
            map.insert("suggested_formatted".to_string(), json!(formatted));
        }
        Ok(value)
    }
}

/// `trinks.create_appointment(service_id, professional_id?, start_iso,
/// phone)` — resolves the client, fills duration and price from the mirror
/// and books with `confirmed=true` through the idempotent booking service.
pub struct CreateAppointmentTool {
    booking: Arc<booking_cell::BookingService>,
    provider: Arc<dyn booking_cell::BookingProvider>,
    catalog: Arc<CatalogStore>,
}

impl CreateAppointmentTool {
    pub fn new(
        booking: Arc<booking_cell::BookingService>,
        provider: Arc<dyn booking_cell::BookingProvider>,
        catalog: Arc<CatalogStore>,
    ) -> Self {
        Self {
            booking,
            provider,
            catalog,
        }
    }
}

#[async_trait]
impl Tool for CreateAppointmentTool {
    fn name(&self) -> &'static str {
        "trinks.create_appointment"
    }

    async fn call(&self, tenant: &str, args: &Value) -> Result<Value, ConversationError> {
        let service_id = args
            .get("service_id")
            .and_then(value_as_i64)
            .ok_or_else(|| ConversationError::ToolCall("service_id is required".to_string()))?;
        let professional_id = args.get("professional_id").and_then(value_as_i64);
        let start_iso = args
            .get("start_iso")
            .and_then(Value::as_str)
            .ok_or_else(|| ConversationError::ToolCall("start_iso is required".to_string()))?;
        let phone = args
            .get("phone")
            .and_then(Value::as_str)
            .ok_or_else(|| ConversationError::ToolCall("phone is required".to_string()))?;

        let client = match self
            .provider
            .find_client_by_phone(phone)
            .await
            .map_err(|e| ConversationError::ToolCall(e.to_string()))?
        {
            Some(client) => client,
            None => return Ok(json!({ "ok": false, "reason": "client_not_found" })),
        };

        let details = self
            .catalog
            .suggestion_for(tenant, service_id)
            .await
            .map_err(|e| ConversationError::ToolCall(e.to_string()))?;
        let (duration_min, price) = details
            .map(|s| (s.duration_min, s.price))
            .unwrap_or((30, None));

        let response = self
            .booking
            .create_confirmed(
                tenant,
                phone,
                booking_cell::CreateAppointmentRequest {
                    service_id,
                    client_id: client.id,
                    start_iso: start_iso.to_string(),
                    duration_min,
                    price,
                    confirmed: true,
                    professional_id,
                    notes: None,
                },
            )
            .await
            .map_err(|e| ConversationError::ToolCall(e.to_string()))?;

        Ok(json!({
            "ok": true,
            "appointment_id": response.id,
            "status": response.status,
        }))
    }
}

/// Tool arguments arrive template-rendered, so numbers may show up as
/// strings.
fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn value_as_u64(value: &Value) -> Option<u64> {
    value_as_i64(value).and_then(|n| u64::try_from(n).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use booking_cell::AppointmentAuditLog;
    use chrono::Utc;
    use catalog_cell::CatalogItem;
    use shared_storage::{KeyValueStore, MemoryStore};
    use shared_utils::normalize::normalize_text;

    async fn catalog() -> Arc<CatalogStore> {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let audit = Arc::new(AppointmentAuditLog::new(kv.clone()));
        let store = Arc::new(CatalogStore::new(kv, audit));
        store
            .upsert(
                "default",
                vec![CatalogItem {
                    tenant: "default".to_string(),
                    service_id: 1,
                    professional_id: 0,
                    service_name: "Corte Feminino".to_string(),
                    normalized_name: normalize_text("Corte Feminino"),
                    category: "Cabelo".to_string(),
                    normalized_category: "cabelo".to_string(),
                    duration_min: 60,
                    price: Some(90.0),
                    visible: true,
                    active: true,
                    last_synced_at: Utc::now(),
                }],
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn search_tool_formats_suggestions() {
        let tool = SearchTopServicesTool::new(catalog().await);
        let result = tool
            .call("default", &json!({ "query": "corte", "limit": 3 }))
            .await
            .unwrap();

        let formatted = result["formatted"].as_str().unwrap();
        assert!(formatted.contains("1) Corte Feminino"));
        assert!(formatted.contains("R$ 90,00"));
        assert_eq!(result["items"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn search_tool_accepts_stringly_limit() {
        let tool = SearchTopServicesTool::new(catalog().await);
        let result = tool
            .call("default", &json!({ "query": "corte", "limit": "2" }))
            .await
            .unwrap();
        assert!(result["items"].is_array());
    }

    #[tokio::test]
    async fn registry_rejects_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry.call("nope", "default", &json!({})).await.unwrap_err();
        assert!(matches!(err, ConversationError::UnknownTool(_)));
    }
}
