use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use shared_storage::KeyValueStore;

const TTL_GRACE: Duration = Duration::from_secs(5);

/// Result of appending one fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum BufferOutcome {
    /// Fragment buffered; no reply yet. Only the flush drives the machine.
    Pending,
    /// Window closed on this append (max fragments); process now.
    Ready(String),
}

/// Emitted by the delayed flush timer when a window elapses.
#[derive(Debug, Clone)]
pub struct FlushEvent {
    pub tenant: String,
    pub phone: String,
    pub aggregated: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct BufferEntry {
    tenant: String,
    fragments: Vec<String>,
}

/// Coalesces bursts of fragments per phone inside a fixed window.
///
/// The first fragment opens the window and arms one timer; fragments within
/// the window append; the flush joins them in arrival order with single
/// spaces. No request handler ever blocks for the window — the timer fires a
/// [`FlushEvent`] that the controller consumes.
///
/// If the backing store is unavailable the buffer degrades to pass-through:
/// the fragment is processed immediately and a metric is recorded. An
/// inbound message is never dropped.
pub struct MessageBuffer {
    store: Arc<dyn KeyValueStore>,
    window: Duration,
    max_messages: usize,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    flush_tx: mpsc::UnboundedSender<FlushEvent>,
}

impl MessageBuffer {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        window: Duration,
        max_messages: usize,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<FlushEvent>) {
        let (flush_tx, flush_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                store,
                window,
                max_messages: max_messages.max(1),
                locks: Mutex::new(HashMap::new()),
                flush_tx,
            }),
            flush_rx,
        )
    }

    pub async fn append(
        self: &Arc<Self>,
        tenant: &str,
        phone: &str,
        fragment: &str,
    ) -> BufferOutcome {
        let lock = self.phone_lock(phone).await;
        let _guard = lock.lock().await;

        let key = buffer_key(phone);
        let existing = match self.store.get(&key).await {
            Ok(value) => value,
            Err(e) => {
                metrics::counter!("buffer_degraded_total").increment(1);
                warn!("Buffer store unavailable, passing message through: {}", e);
                return BufferOutcome::Ready(fragment.to_string());
            }
        };

        let mut entry = match existing {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|_| BufferEntry {
                tenant: tenant.to_string(),
                fragments: Vec::new(),
            }),
            None => {
                // First fragment: open the window and arm the flush timer.
                let entry = BufferEntry {
                    tenant: tenant.to_string(),
                    fragments: vec![fragment.to_string()],
                };
                if let Err(e) = self.write_entry(&key, &entry).await {
                    metrics::counter!("buffer_degraded_total").increment(1);
                    warn!("Buffer store unavailable, passing message through: {}", e);
                    return BufferOutcome::Ready(fragment.to_string());
                }
                self.arm_timer(phone.to_string());
                debug!("Buffer window opened");
                return BufferOutcome::Pending;
            }
        };

        entry.fragments.push(fragment.to_string());

        if entry.fragments.len() >= self.max_messages {
            // Hard cap reached: flush on this append instead of the timer.
            if let Err(e) = self.store.delete(&key).await {
                warn!("Buffer delete failed after max fragments: {}", e);
            }
            metrics::counter!("buffer_flush_total").increment(1);
            return BufferOutcome::Ready(entry.fragments.join(" "));
        }

        if let Err(e) = self.write_entry(&key, &entry).await {
            metrics::counter!("buffer_degraded_total").increment(1);
            warn!("Buffer store unavailable, passing message through: {}", e);
            return BufferOutcome::Ready(fragment.to_string());
        }
        BufferOutcome::Pending
    }

    fn arm_timer(self: &Arc<Self>, phone: String) {
        let buffer = Arc::clone(self);
        let window = self.window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            buffer.flush_due(&phone).await;
        });
    }

    async fn flush_due(self: &Arc<Self>, phone: &str) {
        let lock = self.phone_lock(phone).await;
        let _guard = lock.lock().await;

        let key = buffer_key(phone);
        let entry: Option<BufferEntry> = match self.store.get(&key).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!("Buffer flush read failed: {}", e);
                None
            }
        };

        let Some(entry) = entry else {
            // Flushed early by the fragment cap, or abandoned.
            return;
        };

        if let Err(e) = self.store.delete(&key).await {
            warn!("Buffer flush delete failed: {}", e);
        }

        if entry.fragments.is_empty() {
            return;
        }

        metrics::counter!("buffer_flush_total").increment(1);
        let event = FlushEvent {
            tenant: entry.tenant,
            phone: phone.to_string(),
            aggregated: entry.fragments.join(" "),
        };
        debug!("Buffer window flushed");
        if self.flush_tx.send(event).is_err() {
            warn!("Buffer flush receiver dropped");
        }
    }

    async fn write_entry(
        &self,
        key: &str,
        entry: &BufferEntry,
    ) -> Result<(), shared_storage::StorageError> {
        let raw = serde_json::to_string(entry)?;
        self.store.set(key, &raw, Some(self.window + TTL_GRACE)).await
    }

    async fn phone_lock(&self, phone: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(phone.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

fn buffer_key(phone: &str) -> String {
    format!("buffer:{}", phone)
}
