// =====================================================================================
// SECURITY CELL - WEBHOOK SIGNATURE, RATE LIMITING & CIRCUIT BREAKING
// =====================================================================================
//
// This cell is the security envelope around the conversational core:
// - HMAC-SHA256 webhook verification with a rotatable {current, previous} key ring
// - Per-IP and per-phone sliding-window rate limiting with soft bans
// - Per-dependency circuit breakers (trinks, evolution)
// - Bearer-token + IP-allowlist gate for the admin surface
//
// =====================================================================================

pub mod handlers;
pub mod models;
pub mod services;

pub use models::{BreakerSnapshot, BreakerState, RateDecision, SecurityError};

pub use services::{
    admin_auth::{admin_guard, AdminGate},
    circuit_breaker::{BreakerConfig, CircuitBreaker, CircuitBreakerRegistry},
    rate_limit::{RateLimitConfig, RateLimitService},
    webhook_hmac::WebhookVerifier,
};
