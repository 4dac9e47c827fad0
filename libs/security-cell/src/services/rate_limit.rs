use ipnet::IpNet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use shared_storage::KeyValueStore;

use crate::models::{RateDecision, SecurityError};

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub ip_rpm: u32,
    pub phone_rpm: u32,
    /// Violating windows before a soft ban kicks in.
    pub ban_after_violations: i64,
    pub ban_duration: Duration,
    pub internal_cidrs: Vec<IpNet>,
}

impl RateLimitConfig {
    pub fn new(
        ip_rpm: u32,
        phone_rpm: u32,
        ban_window_min: i64,
        internal_cidrs: &[String],
    ) -> Self {
        let nets = internal_cidrs
            .iter()
            .filter_map(|raw| match raw.parse::<IpNet>() {
                Ok(net) => Some(net),
                Err(_) => {
                    warn!("Ignoring unparsable internal CIDR {}", raw);
                    None
                }
            })
            .collect();
        Self {
            ip_rpm,
            phone_rpm,
            ban_after_violations: 3,
            ban_duration: Duration::from_secs((ban_window_min.max(1) as u64) * 60),
            internal_cidrs: nets,
        }
    }
}

/// One-minute sliding-window counters per source, with a soft ban once a
/// source keeps violating. Counter state lives in the shared store so all
/// instances see the same windows.
pub struct RateLimitService {
    store: Arc<dyn KeyValueStore>,
    config: RateLimitConfig,
}

const WINDOW: Duration = Duration::from_secs(60);

impl RateLimitService {
    pub fn new(store: Arc<dyn KeyValueStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    pub async fn check_ip(&self, ip: IpAddr) -> Result<RateDecision, SecurityError> {
        if self.is_internal(ip) {
            return Ok(RateDecision::Allowed);
        }
        self.check_source(&format!("ip:{}", ip), self.config.ip_rpm)
            .await
    }

    pub async fn check_phone(&self, phone: &str) -> Result<RateDecision, SecurityError> {
        self.check_source(&format!("phone:{}", phone), self.config.phone_rpm)
            .await
    }

    fn is_internal(&self, ip: IpAddr) -> bool {
        self.config.internal_cidrs.iter().any(|net| net.contains(&ip))
    }

    async fn check_source(&self, source: &str, limit: u32) -> Result<RateDecision, SecurityError> {
        let ban_key = format!("ban:{}", source);
        if self.store.get(&ban_key).await?.is_some() {
            return Ok(RateDecision::Banned);
        }

        let counter_key = format!("rate:{}", source);
        let count = self.store.incr_window(&counter_key, WINDOW).await?;

        if count <= limit as i64 {
            return Ok(RateDecision::Allowed);
        }

        metrics::counter!("rate_limited_total").increment(1);

        // First excess hit in a window counts one violation for the source.
        if count == limit as i64 + 1 {
            let violation_key = format!("rate:violations:{}", source);
            let violations = self
                .store
                .incr_window(&violation_key, self.config.ban_duration)
                .await?;
            if violations >= self.config.ban_after_violations {
                warn!("Soft-banning source {} after {} violating windows", source, violations);
                self.store
                    .set(&ban_key, "1", Some(self.config.ban_duration))
                    .await?;
                return Ok(RateDecision::Banned);
            }
        }

        debug!("Rate limited source {} at {} requests", source, count);
        Ok(RateDecision::Limited)
    }
}
