// =====================================================================================
// SECURITY CELL MODELS
// =====================================================================================

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SecurityError {
    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Malformed signature header")]
    MalformedSignature,

    #[error("Secret too short: minimum {minimum} bytes")]
    SecretTooShort { minimum: usize },

    #[error("Rate limited")]
    RateLimited,

    #[error("Source is banned")]
    Banned,

    #[error("Circuit open for dependency {0}")]
    CircuitOpen(String),

    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("IP not allowed")]
    IpNotAllowed,

    #[error("Storage error: {0}")]
    Storage(#[from] shared_storage::StorageError),
}

/// Outcome of a rate-limit check for one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited,
    Banned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Point-in-time view of one breaker, used by health endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub dependency: String,
    pub state: BreakerState,
    pub recent_requests: usize,
    pub recent_errors: usize,
}
