use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One service row as the provider ships it. `professional_id` 0 means the
/// service can be booked with any professional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderService {
    pub service_id: i64,
    #[serde(default)]
    pub professional_id: i64,
    pub nome: String,
    #[serde(default)]
    pub categoria: String,
    pub duracao_em_minutos: i32,
    pub preco: Option<f64>,
    #[serde(default = "default_true")]
    pub visivel_para_cliente: bool,
    #[serde(default = "default_true")]
    pub ativo: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesPage {
    pub items: Vec<ProviderService>,
    pub has_more: bool,
    pub next_page: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggested_times: Vec<String>,
    /// "confirmed" when the provider answered; "categorical" when the
    /// provider was unreachable and the caller may proceed to manual
    /// confirmation.
    pub confidence: String,
}

impl AvailabilityResult {
    pub fn confirmed_ok() -> Self {
        Self {
            ok: true,
            reason: None,
            suggested_times: Vec::new(),
            confidence: "confirmed".to_string(),
        }
    }

    pub fn unavailable(reason: &str, suggested_times: Vec<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.to_string()),
            suggested_times,
            confidence: "confirmed".to_string(),
        }
    }

    pub fn categorical() -> Self {
        Self {
            ok: true,
            reason: None,
            suggested_times: Vec::new(),
            confidence: "categorical".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppointmentRequest {
    pub service_id: i64,
    pub client_id: i64,
    pub start_iso: String,
    pub duration_min: i32,
    pub price: Option<f64>,
    pub confirmed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub professional_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentResponse {
    pub id: i64,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderClient {
    pub id: i64,
    pub nome: Option<String>,
    pub telefone: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Attempted,
    Success,
    Error,
}

/// Audit row written for every provider booking call, keyed by the
/// idempotency key so replays collapse onto the original attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppointmentAttempt {
    pub tenant: String,
    pub phone: String,
    pub service_id: i64,
    pub professional_id: Option<i64>,
    pub start_iso: String,
    pub idempotency_key: String,
    pub request_payload: serde_json::Value,
    pub response_payload: Option<serde_json::Value>,
    pub provider_appointment_id: Option<i64>,
    pub status: AttemptStatus,
    pub created_at: DateTime<Utc>,
}
