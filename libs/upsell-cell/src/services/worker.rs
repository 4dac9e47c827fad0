use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, instrument, warn};

use crate::error::UpsellError;
use crate::models::JobStatus;
use crate::services::scheduler::UpsellScheduler;

/// Periodic worker draining due delayed-upsell jobs. One tick per minute by
/// default; failed deliveries reschedule until the attempt budget runs out.
pub struct UpsellWorker {
    scheduler: Arc<UpsellScheduler>,
    tick: Duration,
    retry_delay_min: i64,
    is_shutdown: tokio::sync::RwLock<bool>,
}

impl UpsellWorker {
    pub fn new(scheduler: Arc<UpsellScheduler>, tick: Duration, retry_delay_min: i64) -> Self {
        Self {
            scheduler,
            tick,
            retry_delay_min,
            is_shutdown: tokio::sync::RwLock::new(false),
        }
    }

    pub async fn start(self: Arc<Self>) {
        info!("Upsell worker started");
        let mut ticker = interval(self.tick);
        loop {
            ticker.tick().await;
            if *self.is_shutdown.read().await {
                info!("Upsell worker stopping");
                break;
            }
            if let Err(e) = self.run_once().await {
                error!("Upsell worker tick failed: {}", e);
            }
        }
    }

    pub async fn shutdown(&self) {
        let mut is_shutdown = self.is_shutdown.write().await;
        *is_shutdown = true;
    }

    /// One sweep over the due jobs. Public so tests and the admin health
    /// endpoint can drive it without the timer.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<usize, UpsellError> {
        let jobs = self.scheduler.jobs();
        let due = jobs.due(Utc::now()).await?;
        let mut processed = 0;

        for job in due {
            if !jobs.claim(&job).await? {
                debug!("Job {} already claimed", job.id);
                continue;
            }

            let mut updated = job.clone();
            updated.attempts += 1;

            match self.scheduler.deliver_job(&job).await {
                Ok(()) => {
                    updated.status = JobStatus::Completed;
                    updated.last_error = None;
                    jobs.save(&updated).await?;
                    processed += 1;
                }
                Err(e) => {
                    warn!("Job {} attempt {} failed: {}", job.id, updated.attempts, e);
                    updated.last_error = Some(e.to_string());
                    if updated.attempts < updated.max_attempts {
                        updated.status = JobStatus::Pending;
                        updated.scheduled_for =
                            Utc::now() + ChronoDuration::minutes(self.retry_delay_min);
                    } else {
                        updated.status = JobStatus::Failed;
                    }
                    jobs.save(&updated).await?;
                }
            }
        }

        Ok(processed)
    }
}
