use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use shared_storage::KeyValueStore;

use crate::error::ChannelError;

const DEDUP_TTL: Duration = Duration::from_secs(10 * 60);

/// Short-TTL set over provider message ids. The gateway redelivers on
/// timeout, and without this the buffer would double-count fragments.
pub struct MessageDeduper {
    store: Arc<dyn KeyValueStore>,
}

impl MessageDeduper {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Returns true the first time a message id is seen within the window.
    /// A store failure counts as first-seen: losing dedup for one message
    /// beats dropping it.
    pub async fn first_seen(&self, message_id: &str) -> Result<bool, ChannelError> {
        let key = format!("dedup:msg:{}", message_id);
        match self.store.set_nx(&key, "1", Some(DEDUP_TTL)).await {
            Ok(first) => {
                if !first {
                    debug!("Duplicate delivery suppressed for message {}", message_id);
                }
                Ok(first)
            }
            Err(e) => {
                metrics::counter!("dedup_degraded_total").increment(1);
                tracing::warn!("Dedup store unavailable, passing message through: {}", e);
                Ok(true)
            }
        }
    }
}
