use std::env;
use tracing::warn;

/// Runtime configuration for the conversational router.
///
/// Every knob has a default so the service boots in development with nothing
/// but the provider credentials set. Secrets stay empty when unset and the
/// affected subsystem refuses to start.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // Tenancy
    pub tenant_default: String,

    // Message buffer
    pub buffer_window_seconds: u64,
    pub buffer_max_messages: usize,

    // Conversation lifecycle
    pub conversation_ttl_hours: i64,
    pub handoff_ttl_hours: i64,

    // Rate limiting
    pub rate_ip_rpm: u32,
    pub rate_phone_rpm: u32,
    pub ban_window_min: i64,
    pub internal_cidrs: Vec<String>,

    // Circuit breaker
    pub cb_error_rate_limit: f64,
    pub cb_open_secs: u64,

    // Webhook HMAC key ring
    pub hmac_secret_current: String,
    pub hmac_secret_prev: Option<String>,

    // Upsell scheduler
    pub upsell_enabled: bool,
    pub upsell_delay_min: i64,
    pub upsell_copy_a_weight: f64,
    pub upsell_pos_immediate_weight: f64,
    pub upsell_max_attempts: u32,
    pub upsell_retry_delay_min: i64,

    // Catalog sync
    pub catalog_sync_page_size: u32,
    pub catalog_sync_lock_ttl_sec: u64,
    pub catalog_sync_watermark_override: Option<String>,

    // Presentation
    pub timezone: String,

    // External services
    pub redis_url: Option<String>,
    pub trinks_base_url: String,
    pub trinks_api_key: String,
    pub trinks_estabelecimento_id: String,
    pub evolution_base_url: String,
    pub evolution_api_key: String,
    pub evolution_instance: String,

    // Admin surface
    pub admin_token: String,
    pub admin_jwt_secret: String,
    pub admin_ip_allowlist: Vec<String>,

    // State graph
    pub flow_file: String,

    // HTTP
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tenant_default: "default".to_string(),
            buffer_window_seconds: 30,
            buffer_max_messages: 8,
            conversation_ttl_hours: 2,
            handoff_ttl_hours: 1,
            rate_ip_rpm: 10,
            rate_phone_rpm: 5,
            ban_window_min: 1,
            internal_cidrs: vec!["127.0.0.0/8".to_string(), "10.0.0.0/8".to_string()],
            cb_error_rate_limit: 0.5,
            cb_open_secs: 5,
            hmac_secret_current: String::new(),
            hmac_secret_prev: None,
            upsell_enabled: true,
            upsell_delay_min: 10,
            upsell_copy_a_weight: 0.5,
            upsell_pos_immediate_weight: 0.5,
            upsell_max_attempts: 3,
            upsell_retry_delay_min: 5,
            catalog_sync_page_size: 100,
            catalog_sync_lock_ttl_sec: 3600,
            catalog_sync_watermark_override: None,
            timezone: "America/Bahia".to_string(),
            redis_url: None,
            trinks_base_url: "https://api.trinks.com/v1".to_string(),
            trinks_api_key: String::new(),
            trinks_estabelecimento_id: String::new(),
            evolution_base_url: "http://localhost:8080".to_string(),
            evolution_api_key: String::new(),
            evolution_instance: "default".to_string(),
            admin_token: String::new(),
            admin_jwt_secret: String::new(),
            admin_ip_allowlist: vec!["127.0.0.0/8".to_string()],
            flow_file: "libs/conversation-cell/flows/atendimento.yaml".to_string(),
            port: 3000,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            tenant_default: env_or("TENANT_DEFAULT", defaults.tenant_default),
            buffer_window_seconds: env_parsed("BUFFER_WINDOW_SECONDS", defaults.buffer_window_seconds),
            buffer_max_messages: env_parsed("BUFFER_MAX_MESSAGES", defaults.buffer_max_messages),
            conversation_ttl_hours: env_parsed("CONVERSATION_TTL_HOURS", defaults.conversation_ttl_hours),
            handoff_ttl_hours: env_parsed("HANDOFF_TTL_HOURS", defaults.handoff_ttl_hours),
            rate_ip_rpm: env_parsed("RATE_IP_RPM", defaults.rate_ip_rpm),
            rate_phone_rpm: env_parsed("RATE_PHONE_RPM", defaults.rate_phone_rpm),
            ban_window_min: env_parsed("BAN_WINDOW_MIN", defaults.ban_window_min),
            internal_cidrs: env_list("INTERNAL_CIDRS", defaults.internal_cidrs),
            cb_error_rate_limit: env_parsed("CB_ERROR_RATE_LIMIT", defaults.cb_error_rate_limit),
            cb_open_secs: env_parsed("CB_OPEN_SECS", defaults.cb_open_secs),
            hmac_secret_current: env_or("HMAC_SECRET_CURRENT", defaults.hmac_secret_current),
            hmac_secret_prev: env::var("HMAC_SECRET_PREV").ok().filter(|s| !s.is_empty()),
            upsell_enabled: env_parsed("UPSELL_ENABLED", defaults.upsell_enabled),
            upsell_delay_min: env_parsed("UPSELL_DELAY_MIN", defaults.upsell_delay_min),
            upsell_copy_a_weight: env_parsed("UPSELL_COPY_A_WEIGHT", defaults.upsell_copy_a_weight),
            upsell_pos_immediate_weight: env_parsed(
                "UPSELL_POS_IMMEDIATE_WEIGHT",
                defaults.upsell_pos_immediate_weight,
            ),
            upsell_max_attempts: env_parsed("UPSELL_MAX_ATTEMPTS", defaults.upsell_max_attempts),
            upsell_retry_delay_min: env_parsed("UPSELL_RETRY_DELAY_MIN", defaults.upsell_retry_delay_min),
            catalog_sync_page_size: env_parsed("CATALOG_SYNC_PAGE_SIZE", defaults.catalog_sync_page_size),
            catalog_sync_lock_ttl_sec: env_parsed(
                "CATALOG_SYNC_LOCK_TTL_SEC",
                defaults.catalog_sync_lock_ttl_sec,
            ),
            catalog_sync_watermark_override: env::var("CATALOG_SYNC_WATERMARK_OVERRIDE")
                .ok()
                .filter(|s| !s.is_empty()),
            timezone: env_or("TIMEZONE", defaults.timezone),
            redis_url: env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
            trinks_base_url: env_or("TRINKS_BASE_URL", defaults.trinks_base_url),
            trinks_api_key: env_or("TRINKS_API_KEY", defaults.trinks_api_key),
            trinks_estabelecimento_id: env_or(
                "TRINKS_ESTABELECIMENTO_ID",
                defaults.trinks_estabelecimento_id,
            ),
            evolution_base_url: env_or("EVOLUTION_BASE_URL", defaults.evolution_base_url),
            evolution_api_key: env_or("EVOLUTION_API_KEY", defaults.evolution_api_key),
            evolution_instance: env_or("EVOLUTION_INSTANCE", defaults.evolution_instance),
            admin_token: env_or("ADMIN_TOKEN", defaults.admin_token),
            admin_jwt_secret: env_or("ADMIN_JWT_SECRET", defaults.admin_jwt_secret),
            admin_ip_allowlist: env_list("ADMIN_IP_ALLOWLIST", defaults.admin_ip_allowlist),
            flow_file: env_or("FLOW_FILE", defaults.flow_file),
            port: env_parsed("PORT", defaults.port),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    /// The credentials without which the webhook and provider paths cannot work.
    pub fn is_configured(&self) -> bool {
        !self.hmac_secret_current.is_empty()
            && !self.trinks_api_key.is_empty()
            && !self.evolution_api_key.is_empty()
    }

    pub fn is_admin_configured(&self) -> bool {
        !self.admin_token.is_empty() && !self.admin_jwt_secret.is_empty()
    }
}

fn env_or(key: &str, default: String) -> String {
    env::var(key).unwrap_or_else(|_| {
        if default.is_empty() {
            warn!("{} not set, using empty value", key);
        }
        default
    })
}

fn env_list(key: &str, default: Vec<String>) -> Vec<String> {
    match env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => default,
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has an unparsable value, using default", key);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.buffer_window_seconds, 30);
        assert_eq!(config.buffer_max_messages, 8);
        assert_eq!(config.conversation_ttl_hours, 2);
        assert_eq!(config.rate_ip_rpm, 10);
        assert_eq!(config.rate_phone_rpm, 5);
        assert_eq!(config.cb_error_rate_limit, 0.5);
        assert_eq!(config.cb_open_secs, 5);
        assert_eq!(config.upsell_delay_min, 10);
        assert_eq!(config.upsell_max_attempts, 3);
        assert_eq!(config.catalog_sync_page_size, 100);
        assert_eq!(config.timezone, "America/Bahia");
    }

    #[test]
    fn unconfigured_without_secrets() {
        let config = AppConfig::default();
        assert!(!config.is_configured());
        assert!(!config.is_admin_configured());
    }
}
