use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use shared_storage::KeyValueStore;

use crate::error::BookingError;
use crate::models::{AppointmentAttempt, AttemptStatus};

/// Append-only log of provider booking calls, plus the idempotency index.
///
/// Layout in the store:
/// - `audit:{tenant}`   — list of serialized [`AppointmentAttempt`]
/// - `idem:{key}`       — the attempt that owns this idempotency key
pub struct AppointmentAuditLog {
    store: Arc<dyn KeyValueStore>,
}

impl AppointmentAuditLog {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn record(&self, attempt: &AppointmentAttempt) -> Result<(), BookingError> {
        let serialized = serde_json::to_string(attempt)?;
        self.store
            .push_back(&format!("audit:{}", attempt.tenant), &serialized)
            .await?;
        self.store
            .set(&format!("idem:{}", attempt.idempotency_key), &serialized, None)
            .await?;
        Ok(())
    }

    pub async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<AppointmentAttempt>, BookingError> {
        match self.store.get(&format!("idem:{}", key)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Successful bookings per service since `since`. Feeds the catalog's
    /// popularity ranking for broad category queries.
    pub async fn successful_bookings_by_service(
        &self,
        tenant: &str,
        since: DateTime<Utc>,
    ) -> Result<HashMap<i64, u32>, BookingError> {
        let rows = self.store.list_all(&format!("audit:{}", tenant)).await?;
        let mut counts: HashMap<i64, u32> = HashMap::new();
        for raw in rows {
            let attempt: AppointmentAttempt = match serde_json::from_str(&raw) {
                Ok(a) => a,
                // A malformed historical row must not poison the ranking.
                Err(_) => continue,
            };
            if attempt.status == AttemptStatus::Success && attempt.created_at >= since {
                *counts.entry(attempt.service_id).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    pub async fn all_for_tenant(
        &self,
        tenant: &str,
    ) -> Result<Vec<AppointmentAttempt>, BookingError> {
        let rows = self.store.list_all(&format!("audit:{}", tenant)).await?;
        let mut attempts = Vec::with_capacity(rows.len());
        for raw in rows {
            attempts.push(serde_json::from_str(&raw)?);
        }
        Ok(attempts)
    }
}
