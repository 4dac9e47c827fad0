use serde::{Deserialize, Serialize};

/// Opaque tenant identifier. Every stored row and cache key is scoped by it.
pub type Tenant = String;

/// Stable reference to one conversation: the tenant plus the E.164 phone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationRef {
    pub tenant: Tenant,
    pub phone: String,
}

impl ConversationRef {
    pub fn new(tenant: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            phone: phone.into(),
        }
    }

    pub fn cache_key(&self) -> String {
        format!("conv:{}:{}", self.tenant, self.phone)
    }
}

/// Normalizes a raw sender identifier to an E.164-style digit string.
///
/// Accepts `+55 11 99999-9999`, `5511999999999@s.whatsapp.net` and plain
/// digit strings. Returns `None` when fewer than 8 digits survive.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let trimmed = raw.split('@').next().unwrap_or(raw);
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 8 || digits.len() > 15 {
        return None;
    }
    Some(digits)
}
