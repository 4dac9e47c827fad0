use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsellEventKind {
    Shown,
    Accepted,
    Declined,
    Scheduled,
    Error,
    NothingToOffer,
    AlreadyOffered,
}

impl UpsellEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpsellEventKind::Shown => "shown",
            UpsellEventKind::Accepted => "accepted",
            UpsellEventKind::Declined => "declined",
            UpsellEventKind::Scheduled => "scheduled",
            UpsellEventKind::Error => "error",
            UpsellEventKind::NothingToOffer => "nothing_to_offer",
            UpsellEventKind::AlreadyOffered => "already_offered",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CopyVariant {
    A,
    B,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionVariant {
    Immediate,
    Delay10,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub copy: CopyVariant,
    pub position: PositionVariant,
}

/// The add-on candidate offered after a confirmed booking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Addon {
    pub service_id: i64,
    pub nome: String,
    pub duracao: i32,
    pub preco: Option<f64>,
}

/// Append-only record of everything the scheduler did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsellEvent {
    pub tenant: String,
    pub conversation_id: String,
    pub phone: String,
    pub event: UpsellEventKind,
    pub addon_id: Option<i64>,
    pub addon_price: Option<f64>,
    pub variant_copy: Option<CopyVariant>,
    pub variant_position: Option<PositionVariant>,
    pub appointment_id: i64,
    pub primary_service_id: i64,
    pub processing_ms: Option<u64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Per-conversation dedupe state. `has_shown` is the at-most-once invariant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpsellConversationState {
    pub has_shown: bool,
    pub last_event: Option<UpsellEventKind>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub last_addon_id: Option<i64>,
    /// Full add-on snapshot so the acceptance reply can name it without a
    /// catalog round-trip.
    pub last_addon: Option<Addon>,
    pub last_variant: Option<Variant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledUpsellJob {
    pub id: String,
    pub tenant: String,
    pub conversation_id: String,
    pub phone: String,
    pub appointment_id: i64,
    pub primary_service_id: i64,
    pub scheduled_for: DateTime<Utc>,
    pub variant: Variant,
    pub attempts: u32,
    pub max_attempts: u32,
    pub status: JobStatus,
    pub last_error: Option<String>,
}

impl ScheduledUpsellJob {
    /// Stable id: replays of the same scheduling decision collapse.
    pub fn stable_id(
        conversation_id: &str,
        appointment_id: i64,
        created_at: DateTime<Utc>,
    ) -> String {
        let input = format!("{}:{}:{}", conversation_id, appointment_id, created_at.timestamp());
        let digest = Sha256::digest(input.as_bytes());
        hex::encode(&digest[..16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_id_is_deterministic() {
        let at = Utc::now();
        let a = ScheduledUpsellJob::stable_id("conv-1", 99, at);
        let b = ScheduledUpsellJob::stable_id("conv-1", 99, at);
        let c = ScheduledUpsellJob::stable_id("conv-2", 99, at);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn event_kind_labels_match_storage_values() {
        assert_eq!(UpsellEventKind::NothingToOffer.as_str(), "nothing_to_offer");
        assert_eq!(UpsellEventKind::AlreadyOffered.as_str(), "already_offered");
    }
}
