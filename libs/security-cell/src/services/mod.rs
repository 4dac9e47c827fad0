pub mod admin_auth;
pub mod circuit_breaker;
pub mod rate_limit;
pub mod webhook_hmac;

pub use admin_auth::AdminGate;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry};
pub use rate_limit::RateLimitService;
pub use webhook_hmac::WebhookVerifier;
