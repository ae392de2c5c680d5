//! Retry, circuit breaker and emergency stop configuration.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::resilience::{
    BreakerSettings, DEFAULT_HISTORY_CAP, DEFAULT_HISTORY_TRIM, ErrorType, ResilienceSettings,
    RetryPolicy, default_retryable,
};

/// Resilience layer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Retry policy for wrapped calls.
    pub retry: RetryConfig,
    /// Defaults for named breakers.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Consecutive exhausted retry sequences that trip the emergency stop.
    pub emergency_failure_threshold: u32,
    /// Error history capacity.
    pub history_cap: usize,
    /// Length the history is trimmed to on overflow.
    pub history_trim: usize,
    /// Balance margin (%) under which checks warn.
    pub low_margin_warning_pct: Decimal,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            emergency_failure_threshold: 5,
            history_cap: DEFAULT_HISTORY_CAP,
            history_trim: DEFAULT_HISTORY_TRIM,
            low_margin_warning_pct: Decimal::from(5),
        }
    }
}

/// Retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Delay after each failed attempt (ms); the last entry repeats.
    pub delays_ms: Vec<u64>,
    /// Error types that may be retried.
    pub retryable: Vec<ErrorType>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delays_ms: vec![1_000, 2_000, 4_000],
            retryable: default_retryable().into_iter().collect(),
        }
    }
}

impl RetryConfig {
    /// Runtime retry policy.
    #[must_use]
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            self.delays_ms.iter().copied().map(Duration::from_millis).collect(),
        )
        .with_retryable(self.retryable.iter().copied())
    }
}

/// Circuit breaker defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a breaker.
    pub failure_threshold: u32,
    /// Cooldown before a half-open probe (seconds).
    pub cooldown_secs: u64,
    /// Cap on the cooldown multiplier after failed probes.
    pub max_backoff_factor: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_secs: 60,
            max_backoff_factor: 8,
        }
    }
}

impl ResilienceConfig {
    /// Runtime resilience settings.
    #[must_use]
    pub fn to_settings(&self) -> ResilienceSettings {
        ResilienceSettings {
            emergency_failure_threshold: self.emergency_failure_threshold,
            history_cap: self.history_cap,
            history_trim: self.history_trim,
            breaker: BreakerSettings {
                failure_threshold: self.circuit_breaker.failure_threshold,
                cooldown: Duration::from_secs(self.circuit_breaker.cooldown_secs),
                max_backoff_factor: self.circuit_breaker.max_backoff_factor,
            },
            retry: self.retry.to_policy(),
            low_margin_warning_pct: self.low_margin_warning_pct,
            ..ResilienceSettings::default()
        }
    }
}
