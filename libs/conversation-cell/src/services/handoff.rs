use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use shared_storage::KeyValueStore;

use crate::error::ConversationError;

/// Per `(tenant, phone)` human-handoff flag with TTL. While set, the bot is
/// frozen and only the handoff template goes out.
pub struct HandoffService {
    store: Arc<dyn KeyValueStore>,
    default_ttl: Duration,
}

impl HandoffService {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl_hours: i64) -> Self {
        Self {
            store,
            default_ttl: Duration::from_secs((ttl_hours.max(1) as u64) * 3600),
        }
    }

    pub async fn activate(&self, tenant: &str, phone: &str) -> Result<(), ConversationError> {
        self.store
            .set(&key(tenant, phone), "1", Some(self.default_ttl))
            .await?;
        info!("Handoff activated for tenant {}", tenant);
        Ok(())
    }

    pub async fn clear(&self, tenant: &str, phone: &str) -> Result<(), ConversationError> {
        self.store.delete(&key(tenant, phone)).await?;
        info!("Handoff cleared for tenant {}", tenant);
        Ok(())
    }

    pub async fn is_active(&self, tenant: &str, phone: &str) -> Result<bool, ConversationError> {
        Ok(self.store.get(&key(tenant, phone)).await?.is_some())
    }
}

fn key(tenant: &str, phone: &str) -> String {
    format!("handoff:{}:{}", tenant, phone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_storage::MemoryStore;

    #[tokio::test]
    async fn activate_check_clear_roundtrip() {
        let service = HandoffService::new(Arc::new(MemoryStore::new()), 1);
        assert!(!service.is_active("default", "5511999999999").await.unwrap());

        service.activate("default", "5511999999999").await.unwrap();
        assert!(service.is_active("default", "5511999999999").await.unwrap());
        // Scoped by tenant and phone.
        assert!(!service.is_active("other", "5511999999999").await.unwrap());

        service.clear("default", "5511999999999").await.unwrap();
        assert!(!service.is_active("default", "5511999999999").await.unwrap());
    }
}
