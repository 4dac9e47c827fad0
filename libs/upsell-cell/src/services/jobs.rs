use chrono::{DateTime, Utc};
use std::sync::Arc;

use shared_storage::KeyValueStore;

use crate::error::UpsellError;
use crate::models::{JobStatus, ScheduledUpsellJob};

/// Persistence for delayed upsell jobs, keyed `upsell:job:{id}`.
pub struct UpsellJobStore {
    store: Arc<dyn KeyValueStore>,
}

impl UpsellJobStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn save(&self, job: &ScheduledUpsellJob) -> Result<(), UpsellError> {
        let raw = serde_json::to_string(job)?;
        self.store
            .set(&format!("upsell:job:{}", job.id), &raw, None)
            .await?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<ScheduledUpsellJob>, UpsellError> {
        match self.store.get(&format!("upsell:job:{}", id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn all(&self) -> Result<Vec<ScheduledUpsellJob>, UpsellError> {
        let keys = self.store.scan_prefix("upsell:job:").await?;
        let mut jobs = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(raw) = self.store.get(&key).await? {
                if let Ok(job) = serde_json::from_str(&raw) {
                    jobs.push(job);
                }
            }
        }
        Ok(jobs)
    }

    pub async fn due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledUpsellJob>, UpsellError> {
        Ok(self
            .all()
            .await?
            .into_iter()
            .filter(|job| job.status == JobStatus::Pending && job.scheduled_for <= now)
            .collect())
    }

    /// Claims a pending job for processing. The status write is guarded by a
    /// set-once marker so two worker ticks cannot both take it.
    pub async fn claim(&self, job: &ScheduledUpsellJob) -> Result<bool, UpsellError> {
        let claimed = self
            .store
            .set_nx(
                &format!("upsell:job:claim:{}:{}", job.id, job.attempts),
                "1",
                Some(std::time::Duration::from_secs(600)),
            )
            .await?;
        if !claimed {
            return Ok(false);
        }
        let mut processing = job.clone();
        processing.status = JobStatus::Processing;
        self.save(&processing).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CopyVariant, PositionVariant, Variant};
    use chrono::Duration;
    use shared_storage::MemoryStore;

    fn job(id: &str, minutes_from_now: i64) -> ScheduledUpsellJob {
        ScheduledUpsellJob {
            id: id.to_string(),
            tenant: "default".to_string(),
            conversation_id: "conv-1".to_string(),
            phone: "5511999999999".to_string(),
            appointment_id: 99,
            primary_service_id: 1,
            scheduled_for: Utc::now() + Duration::minutes(minutes_from_now),
            variant: Variant {
                copy: CopyVariant::A,
                position: PositionVariant::Delay10,
            },
            attempts: 0,
            max_attempts: 3,
            status: JobStatus::Pending,
            last_error: None,
        }
    }

    #[tokio::test]
    async fn due_returns_only_ripe_pending_jobs() {
        let store = UpsellJobStore::new(Arc::new(MemoryStore::new()));
        store.save(&job("ripe", -1)).await.unwrap();
        store.save(&job("future", 10)).await.unwrap();
        let mut done = job("done", -5);
        done.status = JobStatus::Completed;
        store.save(&done).await.unwrap();

        let due = store.due(Utc::now()).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, "ripe");
    }

    #[tokio::test]
    async fn claim_is_exclusive_per_attempt() {
        let store = UpsellJobStore::new(Arc::new(MemoryStore::new()));
        let j = job("j1", -1);
        store.save(&j).await.unwrap();

        assert!(store.claim(&j).await.unwrap());
        assert!(!store.claim(&j).await.unwrap());
        assert_eq!(store.get("j1").await.unwrap().unwrap().status, JobStatus::Processing);
    }
}
