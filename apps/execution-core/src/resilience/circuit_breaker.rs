//! Named circuit breakers for venue and service calls.
//!
//! One breaker per operation name, created lazily on first use.
//!
//! # State Machine
//!
//! ```text
//! CLOSED → OPEN (consecutive failures >= threshold)
//! OPEN → HALF_OPEN (now >= reset_at, exactly one probe admitted)
//! HALF_OPEN → CLOSED (probe succeeds)
//! HALF_OPEN → OPEN (probe fails, reset time extended)
//! ```
//!
//! Only the probe decides the half-open outcome. Results of calls admitted
//! before the breaker opened count toward totals and nothing else.
//!
//! # Example
//!
//! ```rust,ignore
//! let registry = CircuitBreakerRegistry::new(BreakerSettings::default());
//!
//! let admission = registry.try_acquire("venue:alpha", None)?;
//! match call_venue().await {
//!     Ok(fill) => registry.record_success("venue:alpha", admission),
//!     Err(e) => registry.record_failure("venue:alpha", admission),
//! }
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::error::ResilienceError;

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls fail fast.
    Open,
    /// A single probe call is in flight.
    HalfOpen,
}

impl CircuitState {
    /// Numeric encoding for gauges.
    #[must_use]
    pub const fn as_gauge(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::Open => 1.0,
            Self::HalfOpen => 2.0,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Breaker tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSettings {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// Time the breaker stays open before admitting a probe.
    pub cooldown: Duration,
    /// Upper bound on the cooldown multiplier after repeated failed probes.
    pub max_backoff_factor: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
            max_backoff_factor: 8,
        }
    }
}

impl BreakerSettings {
    /// Settings with the given threshold and cooldown.
    #[must_use]
    pub const fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            max_backoff_factor: 8,
        }
    }

    fn reopen_cooldown(&self, failed_probes: u32) -> Duration {
        let factor = 2_u32
            .saturating_pow(failed_probes)
            .min(self.max_backoff_factor.max(1));
        self.cooldown.saturating_mul(factor)
    }
}

/// Per-name breaker state.
#[derive(Debug, Clone)]
pub struct CircuitBreakerState {
    settings: BreakerSettings,
    failure_count: u32,
    open: bool,
    opened_at: Option<Instant>,
    reset_at: Option<Instant>,
    half_open_attempts: u32,
    failed_probes: u32,
    total_calls: u64,
    total_failures: u64,
    state_transitions: u64,
}

impl CircuitBreakerState {
    fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            failure_count: 0,
            open: false,
            opened_at: None,
            reset_at: None,
            half_open_attempts: 0,
            failed_probes: 0,
            total_calls: 0,
            total_failures: 0,
            state_transitions: 0,
        }
    }

    /// Current circuit state.
    #[must_use]
    pub const fn state(&self) -> CircuitState {
        if !self.open {
            CircuitState::Closed
        } else if self.half_open_attempts > 0 {
            CircuitState::HalfOpen
        } else {
            CircuitState::Open
        }
    }

    fn open_until(&mut self, cooldown: Duration) {
        let now = Instant::now();
        self.open = true;
        self.opened_at = Some(now);
        self.reset_at = Some(now + cooldown);
        self.half_open_attempts = 0;
        self.state_transitions += 1;
    }

    fn close(&mut self) {
        self.open = false;
        self.failure_count = 0;
        self.opened_at = None;
        self.reset_at = None;
        self.half_open_attempts = 0;
        self.failed_probes = 0;
        self.state_transitions += 1;
    }

    fn metrics(&self, name: &str) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            name: name.to_string(),
            state: self.state(),
            failure_count: self.failure_count,
            failure_threshold: self.settings.failure_threshold,
            total_calls: self.total_calls,
            total_failures: self.total_failures,
            state_transitions: self.state_transitions,
            reset_in_ms: self
                .reset_at
                .map(|at| at.saturating_duration_since(Instant::now()).as_millis() as u64),
        }
    }
}

/// How a call was admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Breaker closed.
    Normal,
    /// The single half-open probe.
    Probe,
}

/// Snapshot of one breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Breaker name.
    pub name: String,
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failures while closed.
    pub failure_count: u32,
    /// Threshold that opens the breaker.
    pub failure_threshold: u32,
    /// Total admitted calls.
    pub total_calls: u64,
    /// Total failures.
    pub total_failures: u64,
    /// Number of state transitions.
    pub state_transitions: u64,
    /// Time until a probe is permitted, when open.
    pub reset_in_ms: Option<u64>,
}

/// All named breakers behind one lock.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    defaults: BreakerSettings,
    breakers: Mutex<HashMap<String, CircuitBreakerState>>,
}

impl CircuitBreakerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(defaults: BreakerSettings) -> Self {
        Self {
            defaults,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Default settings applied to lazily created breakers.
    #[must_use]
    pub const fn defaults(&self) -> BreakerSettings {
        self.defaults
    }

    /// Ask to make a call through breaker `name`.
    ///
    /// `settings` only applies when the breaker does not exist yet.
    pub fn try_acquire(
        &self,
        name: &str,
        settings: Option<BreakerSettings>,
    ) -> Result<Admission, ResilienceError> {
        let mut breakers = self.breakers.lock();
        let breaker = breakers
            .entry(name.to_string())
            .or_insert_with(|| CircuitBreakerState::new(settings.unwrap_or(self.defaults)));

        if !breaker.open {
            breaker.total_calls += 1;
            return Ok(Admission::Normal);
        }

        let now = Instant::now();
        let reset_at = breaker.reset_at.unwrap_or(now);
        if now >= reset_at && breaker.half_open_attempts == 0 {
            breaker.half_open_attempts = 1;
            breaker.total_calls += 1;
            breaker.state_transitions += 1;
            drop(breakers);
            tracing::info!(name = %name, from = "OPEN", to = "HALF_OPEN", "Circuit breaker probing");
            return Ok(Admission::Probe);
        }

        Err(ResilienceError::CircuitOpen {
            name: name.to_string(),
            reset_in: reset_at.saturating_duration_since(now),
        })
    }

    /// Record a successful call admitted as `admission`.
    ///
    /// Closes an open breaker only when the in-flight probe succeeds.
    pub fn record_success(&self, name: &str, admission: Admission) {
        let mut breakers = self.breakers.lock();
        let Some(breaker) = breakers.get_mut(name) else {
            return;
        };
        if !breaker.open {
            breaker.failure_count = 0;
            return;
        }
        if admission == Admission::Probe && breaker.half_open_attempts > 0 {
            breaker.close();
            drop(breakers);
            tracing::info!(name = %name, to = "CLOSED", "Circuit breaker closed");
        }
    }

    /// Record a failed call admitted as `admission`. Returns the resulting
    /// state.
    ///
    /// While open, only a failed probe re-opens the breaker.
    pub fn record_failure(&self, name: &str, admission: Admission) -> CircuitState {
        let mut breakers = self.breakers.lock();
        let breaker = breakers
            .entry(name.to_string())
            .or_insert_with(|| CircuitBreakerState::new(self.defaults));
        breaker.total_failures += 1;

        if breaker.open {
            if admission == Admission::Probe && breaker.half_open_attempts > 0 {
                breaker.failed_probes += 1;
                let cooldown = breaker.settings.reopen_cooldown(breaker.failed_probes);
                breaker.open_until(cooldown);
                drop(breakers);
                tracing::warn!(
                    name = %name,
                    cooldown_ms = cooldown.as_millis() as u64,
                    "Circuit breaker probe failed, re-opened"
                );
                return CircuitState::Open;
            }
            return breaker.state();
        }

        breaker.failure_count += 1;
        if breaker.failure_count >= breaker.settings.failure_threshold {
            let cooldown = breaker.settings.cooldown;
            let failures = breaker.failure_count;
            breaker.open_until(cooldown);
            drop(breakers);
            tracing::warn!(
                name = %name,
                failures,
                cooldown_ms = cooldown.as_millis() as u64,
                "Circuit breaker opened"
            );
            return CircuitState::Open;
        }
        CircuitState::Closed
    }

    /// Current state of `name` (closed if unknown).
    #[must_use]
    pub fn state(&self, name: &str) -> CircuitState {
        self.breakers
            .lock()
            .get(name)
            .map_or(CircuitState::Closed, CircuitBreakerState::state)
    }

    /// Snapshot of one breaker.
    #[must_use]
    pub fn metrics(&self, name: &str) -> Option<CircuitBreakerMetrics> {
        self.breakers.lock().get(name).map(|b| b.metrics(name))
    }

    /// Snapshots of all breakers, sorted by name.
    #[must_use]
    pub fn all_metrics(&self) -> Vec<CircuitBreakerMetrics> {
        let breakers = self.breakers.lock();
        let mut metrics: Vec<_> = breakers.iter().map(|(n, b)| b.metrics(n)).collect();
        drop(breakers);
        metrics.sort_by(|a, b| a.name.cmp(&b.name));
        metrics
    }

    /// Force a breaker open for its configured cooldown.
    pub fn force_open(&self, name: &str) {
        let mut breakers = self.breakers.lock();
        let breaker = breakers
            .entry(name.to_string())
            .or_insert_with(|| CircuitBreakerState::new(self.defaults));
        let cooldown = breaker.settings.cooldown;
        breaker.open_until(cooldown);
    }

    /// Close a breaker and clear its counters.
    pub fn reset(&self, name: &str) {
        if let Some(breaker) = self.breakers.lock().get_mut(name) {
            breaker.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(threshold: u32, cooldown_ms: u64) -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::new(BreakerSettings::new(
            threshold,
            Duration::from_millis(cooldown_ms),
        ))
    }

    #[test]
    fn test_initial_state_is_closed() {
        let registry = registry(3, 50);
        assert_eq!(registry.state("venue"), CircuitState::Closed);
        assert_eq!(registry.try_acquire("venue", None), Ok(Admission::Normal));
    }

    #[test]
    fn test_opens_at_threshold() {
        let registry = registry(3, 10_000);
        for _ in 0..2 {
            registry.try_acquire("venue", None).unwrap();
            assert_eq!(registry.record_failure("venue", Admission::Normal), CircuitState::Closed);
        }
        registry.try_acquire("venue", None).unwrap();
        assert_eq!(registry.record_failure("venue", Admission::Normal), CircuitState::Open);

        let err = registry.try_acquire("venue", None).unwrap_err();
        assert!(matches!(err, ResilienceError::CircuitOpen { ref name, .. } if name == "venue"));
    }

    #[test]
    fn test_success_resets_failure_count() {
        let registry = registry(3, 10_000);
        registry.try_acquire("venue", None).unwrap();
        registry.record_failure("venue", Admission::Normal);
        registry.record_failure("venue", Admission::Normal);
        registry.record_success("venue", Admission::Normal);
        registry.record_failure("venue", Admission::Normal);
        assert_eq!(registry.state("venue"), CircuitState::Closed);
    }

    #[test]
    fn test_single_probe_after_cooldown() {
        let registry = registry(1, 10);
        registry.try_acquire("venue", None).unwrap();
        registry.record_failure("venue", Admission::Normal);

        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(registry.try_acquire("venue", None), Ok(Admission::Probe));
        assert_eq!(registry.state("venue"), CircuitState::HalfOpen);
        // Second caller while the probe is in flight fails fast.
        assert!(registry.try_acquire("venue", None).is_err());

        registry.record_success("venue", Admission::Probe);
        assert_eq!(registry.state("venue"), CircuitState::Closed);
    }

    #[test]
    fn test_failed_probe_extends_reset() {
        let registry = registry(1, 10);
        registry.try_acquire("venue", None).unwrap();
        registry.record_failure("venue", Admission::Normal);
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(registry.try_acquire("venue", None), Ok(Admission::Probe));
        assert_eq!(registry.record_failure("venue", Admission::Probe), CircuitState::Open);

        let metrics = registry.metrics("venue").unwrap();
        assert_eq!(metrics.state, CircuitState::Open);
        // Re-opened with doubled cooldown (20ms), so more than one base cooldown remains.
        assert!(metrics.reset_in_ms.unwrap() > 10);
    }

    #[test]
    fn test_breakers_are_independent() {
        let registry = registry(1, 10_000);
        registry.try_acquire("a", None).unwrap();
        registry.record_failure("a", Admission::Normal);
        assert_eq!(registry.state("a"), CircuitState::Open);
        assert_eq!(registry.try_acquire("b", None), Ok(Admission::Normal));
    }

    #[test]
    fn test_per_breaker_settings_on_creation() {
        let registry = registry(10, 10_000);
        let custom = BreakerSettings::new(1, Duration::from_secs(5));
        registry.try_acquire("strict", Some(custom)).unwrap();
        assert_eq!(registry.record_failure("strict", Admission::Normal), CircuitState::Open);
    }

    #[test]
    fn test_force_open_and_reset() {
        let registry = registry(3, 10_000);
        registry.force_open("venue");
        assert_eq!(registry.state("venue"), CircuitState::Open);
        registry.reset("venue");
        assert_eq!(registry.state("venue"), CircuitState::Closed);
        assert_eq!(registry.all_metrics().len(), 1);
    }

    #[test]
    fn test_reopen_cooldown_is_capped() {
        let settings = BreakerSettings::new(1, Duration::from_secs(1));
        assert_eq!(settings.reopen_cooldown(1), Duration::from_secs(2));
        assert_eq!(settings.reopen_cooldown(2), Duration::from_secs(4));
        assert_eq!(settings.reopen_cooldown(10), Duration::from_secs(8));
    }

    #[test]
    fn test_stale_results_do_not_decide_half_open() {
        let registry = registry(1, 10);
        // Admitted while closed, still in flight when the breaker trips.
        let slow = registry.try_acquire("venue", None).unwrap();
        let fast = registry.try_acquire("venue", None).unwrap();
        assert_eq!(registry.record_failure("venue", fast), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(20));

        let trial = registry.try_acquire("venue", None).unwrap();
        assert_eq!(trial, Admission::Probe);

        assert_eq!(registry.record_failure("venue", slow), CircuitState::HalfOpen);
        registry.record_success("venue", slow);
        assert_eq!(registry.state("venue"), CircuitState::HalfOpen);
        let metrics = registry.metrics("venue").unwrap();
        assert_eq!(metrics.total_failures, 2);
        assert_eq!(metrics.reset_in_ms, Some(0));

        registry.record_success("venue", trial);
        assert_eq!(registry.state("venue"), CircuitState::Closed);
    }
}
