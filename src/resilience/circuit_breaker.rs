//! Three-state circuit breaker gating calls to one remote provider, plus a
//! process-wide registry keyed by provider slug.
//!
//! States: closed (requests pass), open (requests blocked), half-open
//! (limited probe traffic after the cool-down). The open → half-open
//! transition is evaluated lazily on access rather than by a timer task.
//!
//! Version dependencies:
//! - parking_lot = "0.12"
//! - dashmap = "5.5"

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

/// Breaker thresholds and cool-down. Per-provider overrides come from
/// `Settings::breaker_config`.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures needed to trip the breaker open.
    pub failure_threshold: u32,
    /// Successes needed in half-open to close again.
    pub success_threshold: u32,
    /// Cool-down before an open breaker admits probe traffic.
    pub timeout: Duration,
    /// Probe budget while half-open.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
            half_open_max_calls: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Read-only view of one breaker for the observability surface.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub provider_slug: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub half_open_calls: u32,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
    half_open_calls: u32,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            last_failure_at: None,
            half_open_calls: 0,
        }
    }
}

/// Failure gate for one provider. All transitions and counter mutations run
/// under the per-breaker lock.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a call may proceed right now. In half-open this consumes one
    /// probe slot.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock();
        Self::check_cooldown(&mut inner, &self.config, &self.name);

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if inner.half_open_calls < self.config.half_open_max_calls {
                    inner.half_open_calls += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.success_count += 1;

        match inner.state {
            CircuitState::HalfOpen => {
                if inner.success_count >= self.config.success_threshold {
                    Self::transition(&mut inner, CircuitState::Closed, &self.name);
                }
            }
            CircuitState::Closed => {
                // A success while closed clears the failure streak.
                inner.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());
        inner.last_failure_at = Some(Utc::now());

        match inner.state {
            // One failed probe re-opens the circuit.
            CircuitState::HalfOpen => Self::transition(&mut inner, CircuitState::Open, &self.name),
            CircuitState::Closed => {
                if inner.failure_count >= self.config.failure_threshold {
                    Self::transition(&mut inner, CircuitState::Open, &self.name);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Current state, after applying the lazy cool-down transition.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        Self::check_cooldown(&mut inner, &self.config, &self.name);
        inner.state
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Manual reset back to closed.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        *inner = BreakerInner::new();
        info!(breaker = %self.name, "circuit breaker manually reset");
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let mut inner = self.inner.lock();
        Self::check_cooldown(&mut inner, &self.config, &self.name);
        CircuitSnapshot {
            provider_slug: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure_time: inner.last_failure_at,
            half_open_calls: inner.half_open_calls,
        }
    }

    fn check_cooldown(inner: &mut BreakerInner, config: &CircuitBreakerConfig, name: &str) {
        if inner.state == CircuitState::Open {
            if let Some(last_failure) = inner.last_failure {
                if last_failure.elapsed() >= config.timeout {
                    Self::transition(inner, CircuitState::HalfOpen, name);
                }
            }
        }
    }

    fn transition(inner: &mut BreakerInner, new_state: CircuitState, name: &str) {
        let old_state = inner.state;
        inner.state = new_state;

        match new_state {
            CircuitState::Closed => {
                inner.failure_count = 0;
                inner.success_count = 0;
                inner.half_open_calls = 0;
                inner.last_failure = None;
                inner.last_failure_at = None;
            }
            CircuitState::HalfOpen => {
                inner.success_count = 0;
                inner.half_open_calls = 0;
            }
            CircuitState::Open => {}
        }

        info!(
            breaker = name,
            from = old_state.as_str(),
            to = new_state.as_str(),
            "circuit breaker state change"
        );
    }
}

/// Process-wide breaker registry, one breaker per provider slug. The map is
/// lock-free for readers; each breaker carries its own lock.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the breaker for `name`, creating it with `config` on first
    /// sight. Later calls ignore `config`.
    pub fn get_or_create(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config)))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|entry| entry.clone())
    }

    /// Manual reset of one breaker. Returns false if the name is unknown.
    pub fn reset(&self, name: &str) -> bool {
        match self.breakers.get(name) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    /// Read-only snapshot of every registered breaker.
    pub fn snapshot_all(&self) -> Vec<CircuitSnapshot> {
        let mut snapshots: Vec<CircuitSnapshot> = self
            .breakers
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.provider_slug.cmp(&b.provider_slug));
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_millis(50),
            half_open_max_calls: 3,
        }
    }

    #[test]
    fn opens_after_failure_threshold() {
        let breaker = CircuitBreaker::new("sport-direct", fast_config());
        assert!(breaker.can_execute());

        for _ in 0..5 {
            breaker.record_failure();
        }

        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_execute());
    }

    #[test]
    fn success_resets_failure_streak_while_closed() {
        let breaker = CircuitBreaker::new("sport-direct", fast_config());

        for _ in 0..4 {
            breaker.record_failure();
        }
        breaker.record_success();
        breaker.record_failure();

        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn cooldown_transitions_to_half_open_and_limits_probes() {
        let breaker = CircuitBreaker::new("alpine-gear", fast_config());
        for _ in 0..5 {
            breaker.record_failure();
        }
        assert!(!breaker.can_execute());

        std::thread::sleep(Duration::from_millis(60));

        // First access after the cool-down flips to half-open.
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // Probe budget is 3 in total; one was consumed above.
        assert!(breaker.can_execute());
        assert!(breaker.can_execute());
        assert!(!breaker.can_execute());
    }

    #[test]
    fn half_open_closes_after_success_threshold() {
        let breaker = CircuitBreaker::new("alpine-gear", fast_config());
        for _ in 0..5 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(60));
        assert!(breaker.can_execute());

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("dag-spor", fast_config());
        for _ in 0..5 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(60));
        assert!(breaker.can_execute());

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn registry_returns_same_instance_per_name() {
        let registry = CircuitBreakerRegistry::new();
        let first = registry.get_or_create("outdoor-pro", fast_config());
        let second = registry.get_or_create("outdoor-pro", CircuitBreakerConfig::default());
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn snapshot_reflects_counters() {
        let registry = CircuitBreakerRegistry::new();
        let breaker = registry.get_or_create("outdoor-pro", fast_config());
        breaker.record_failure();
        breaker.record_failure();

        let snapshots = registry.snapshot_all();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].provider_slug, "outdoor-pro");
        assert_eq!(snapshots[0].failure_count, 2);
        assert_eq!(snapshots[0].state, CircuitState::Closed);
        assert!(snapshots[0].last_failure_time.is_some());
    }

    #[test]
    fn manual_reset_closes_the_circuit() {
        let registry = CircuitBreakerRegistry::new();
        let breaker = registry.get_or_create("dag-spor", fast_config());
        for _ in 0..5 {
            breaker.record_failure();
        }
        assert!(breaker.is_open());

        assert!(registry.reset("dag-spor"));
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(!registry.reset("unknown"));
    }
}
