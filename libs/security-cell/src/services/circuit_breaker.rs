use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::models::{BreakerSnapshot, BreakerState, SecurityError};

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Rolling error rate that opens the breaker.
    pub error_rate_limit: f64,
    /// Requests kept in the rolling window.
    pub window_size: usize,
    /// Requests required before the error rate is meaningful.
    pub min_request_volume: usize,
    pub open_duration: Duration,
    /// Probes admitted while half-open before deciding.
    pub half_open_probes: usize,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            error_rate_limit: 0.5,
            window_size: 20,
            min_request_volume: 10,
            open_duration: Duration::from_secs(5),
            half_open_probes: 3,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    probes_in_flight: usize,
    probe_failures: usize,
    probe_successes: usize,
}

/// closed → open → half-open → closed breaker for one external dependency.
///
/// Callers `try_acquire` before the call and `record` afterwards; an open
/// breaker fails fast and the caller maps that to its soft-failure path.
pub struct CircuitBreaker {
    dependency: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(dependency: &str, config: BreakerConfig) -> Self {
        Self {
            dependency: dependency.to_string(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                window: VecDeque::new(),
                opened_at: None,
                probes_in_flight: 0,
                probe_failures: 0,
                probe_successes: 0,
            }),
        }
    }

    pub fn try_acquire(&self) -> Result<(), SecurityError> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.open_duration {
                    info!("Breaker {} entering half-open", self.dependency);
                    inner.state = BreakerState::HalfOpen;
                    inner.probes_in_flight = 1;
                    inner.probe_failures = 0;
                    inner.probe_successes = 0;
                    Ok(())
                } else {
                    Err(SecurityError::CircuitOpen(self.dependency.clone()))
                }
            }
            BreakerState::HalfOpen => {
                if inner.probes_in_flight < self.config.half_open_probes {
                    inner.probes_in_flight += 1;
                    Ok(())
                } else {
                    Err(SecurityError::CircuitOpen(self.dependency.clone()))
                }
            }
        }
    }

    pub fn record(&self, success: bool) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::Closed => {
                inner.window.push_back(success);
                while inner.window.len() > self.config.window_size {
                    inner.window.pop_front();
                }
                if self.should_open(&inner) {
                    warn!("Breaker {} opening on error rate", self.dependency);
                    metrics::counter!("circuit_open_total", "dependency" => self.dependency.clone())
                        .increment(1);
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    inner.window.clear();
                }
            }
            BreakerState::HalfOpen => {
                if success {
                    inner.probe_successes += 1;
                } else {
                    inner.probe_failures += 1;
                }
                let decided = inner.probe_successes + inner.probe_failures;
                if inner.probe_failures > 0 {
                    warn!("Breaker {} re-opening after failed probe", self.dependency);
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                } else if decided >= self.config.half_open_probes {
                    info!("Breaker {} closing after healthy probes", self.dependency);
                    inner.state = BreakerState::Closed;
                    inner.window.clear();
                }
            }
            // A late record after re-opening changes nothing.
            BreakerState::Open => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker lock poisoned").state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().expect("breaker lock poisoned");
        BreakerSnapshot {
            dependency: self.dependency.clone(),
            state: inner.state,
            recent_requests: inner.window.len(),
            recent_errors: inner.window.iter().filter(|ok| !**ok).count(),
        }
    }

    fn should_open(&self, inner: &BreakerInner) -> bool {
        if inner.window.len() < self.config.min_request_volume {
            return false;
        }
        let errors = inner.window.iter().filter(|ok| !**ok).count();
        (errors as f64 / inner.window.len() as f64) > self.config.error_rate_limit
    }
}

/// Breakers keyed by dependency name (`trinks`, `evolution`, ...).
pub struct CircuitBreakerRegistry {
    config: BreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn for_dependency(&self, dependency: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().expect("registry lock poisoned");
        breakers
            .entry(dependency.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(dependency, self.config.clone())))
            .clone()
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let breakers = self.breakers.lock().expect("registry lock poisoned");
        breakers.values().map(|b| b.snapshot()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            error_rate_limit: 0.5,
            window_size: 10,
            min_request_volume: 4,
            open_duration: Duration::from_millis(20),
            half_open_probes: 2,
        }
    }

    #[test]
    fn stays_closed_under_min_volume() {
        let breaker = CircuitBreaker::new("trinks", fast_config());
        for _ in 0..3 {
            breaker.try_acquire().unwrap();
            breaker.record(false);
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn opens_on_error_rate() {
        let breaker = CircuitBreaker::new("trinks", fast_config());
        for _ in 0..4 {
            breaker.try_acquire().unwrap();
            breaker.record(false);
        }
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_matches!(breaker.try_acquire(), Err(SecurityError::CircuitOpen(_)));
    }

    #[test]
    fn half_open_closes_after_healthy_probes() {
        let breaker = CircuitBreaker::new("trinks", fast_config());
        for _ in 0..4 {
            breaker.try_acquire().unwrap();
            breaker.record(false);
        }
        std::thread::sleep(Duration::from_millis(30));

        // First acquire flips to half-open.
        breaker.try_acquire().unwrap();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.record(true);
        breaker.try_acquire().unwrap();
        breaker.record(true);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_reopens_on_probe_failure() {
        let breaker = CircuitBreaker::new("evolution", fast_config());
        for _ in 0..4 {
            breaker.try_acquire().unwrap();
            breaker.record(false);
        }
        std::thread::sleep(Duration::from_millis(30));

        breaker.try_acquire().unwrap();
        breaker.record(false);
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn registry_returns_same_breaker_per_dependency() {
        let registry = CircuitBreakerRegistry::new(fast_config());
        let a = registry.for_dependency("trinks");
        let b = registry.for_dependency("trinks");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.snapshots().len(), 1);
    }
}
