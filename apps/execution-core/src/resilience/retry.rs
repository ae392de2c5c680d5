//! Retry policies and backoff schedules.
//!
//! A [`RetryPolicy`] is an explicit delay table: attempt `n` (0-based) waits
//! `delays[min(n, len - 1)]` before the next try, unless the failure carries
//! its own retry-after. Schedules can be written out by hand or generated
//! with exponential growth and jitter.
//!
//! # Example
//!
//! ```rust,ignore
//! use execution_core::resilience::RetryPolicy;
//! use std::time::Duration;
//!
//! // 100ms, 200ms, 400ms, 800ms (±20%), capped at 30s
//! let policy = RetryPolicy::exponential(5, Duration::from_millis(100), Duration::from_secs(30), 2.0, 0.2);
//! ```

use std::collections::BTreeSet;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::taxonomy::ErrorType;

/// Retry configuration for a wrapped call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Delay table indexed by attempt.
    pub delays: Vec<Duration>,
    /// Error types that may be retried.
    pub retryable: BTreeSet<ErrorType>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
            ],
            retryable: default_retryable(),
        }
    }
}

/// `{network, timeout, rate_limited}`.
#[must_use]
pub fn default_retryable() -> BTreeSet<ErrorType> {
    ErrorType::ALL
        .into_iter()
        .filter(|t| t.is_retryable())
        .collect()
}

impl RetryPolicy {
    /// Policy with an explicit delay table and the default retryable set.
    #[must_use]
    pub fn new(max_attempts: u32, delays: Vec<Duration>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delays,
            retryable: default_retryable(),
        }
    }

    /// Single attempt, no retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::new(1, Vec::new())
    }

    /// Exponential schedule: `initial * multiplier^n`, capped at `max`, with
    /// ±`jitter` randomisation.
    #[must_use]
    pub fn exponential(
        max_attempts: u32,
        initial: Duration,
        max: Duration,
        multiplier: f64,
        jitter: f64,
    ) -> Self {
        let mut backoff = ExponentialBackoffCalculator {
            current_attempt: 0,
            max_attempts: max_attempts.saturating_sub(1),
            initial_backoff_ms: initial.as_millis() as u64,
            max_backoff_ms: max.as_millis() as u64,
            backoff_multiplier: multiplier,
            jitter_factor: jitter,
        };
        let delays = std::iter::from_fn(|| backoff.next_backoff()).collect();
        Self::new(max_attempts, delays)
    }

    /// Override the retryable set.
    #[must_use]
    pub fn with_retryable(mut self, retryable: impl IntoIterator<Item = ErrorType>) -> Self {
        self.retryable = retryable.into_iter().collect();
        self
    }

    /// Whether failures of `error_type` may be retried under this policy.
    #[must_use]
    pub fn is_retryable(&self, error_type: ErrorType) -> bool {
        self.retryable.contains(&error_type)
    }

    /// Delay after the given 0-based attempt.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.delays.is_empty() {
            return Duration::ZERO;
        }
        let index = (attempt as usize).min(self.delays.len() - 1);
        self.delays[index]
    }
}

/// Calculator for exponential backoff with jitter.
#[derive(Debug)]
struct ExponentialBackoffCalculator {
    current_attempt: u32,
    max_attempts: u32,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
    backoff_multiplier: f64,
    jitter_factor: f64,
}

impl ExponentialBackoffCalculator {
    /// Next backoff, or `None` once the attempt budget is spent.
    fn next_backoff(&mut self) -> Option<Duration> {
        if self.current_attempt >= self.max_attempts {
            return None;
        }

        let base_backoff_ms = self.calculate_base_backoff_ms();
        let jittered_ms = self.apply_jitter(base_backoff_ms);
        let capped_ms = jittered_ms.min(self.max_backoff_ms);

        self.current_attempt += 1;

        Some(Duration::from_millis(capped_ms))
    }

    fn calculate_base_backoff_ms(&self) -> u64 {
        let multiplier = self.backoff_multiplier.powi(self.current_attempt as i32);
        let backoff = (self.initial_backoff_ms as f64 * multiplier) as u64;
        backoff.min(self.max_backoff_ms)
    }

    /// Uniform in `[backoff * (1 - jitter), backoff * (1 + jitter)]`.
    fn apply_jitter(&self, backoff_ms: u64) -> u64 {
        if self.jitter_factor <= 0.0 || backoff_ms == 0 {
            return backoff_ms;
        }
        let mut rng = rand::rng();
        let jitter_range = backoff_ms as f64 * self.jitter_factor;
        let min = (backoff_ms as f64 - jitter_range).max(0.0);
        let max = backoff_ms as f64 + jitter_range;
        rng.random_range(min..=max) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert!(policy.is_retryable(ErrorType::Network));
        assert!(policy.is_retryable(ErrorType::Timeout));
        assert!(policy.is_retryable(ErrorType::RateLimited));
        assert!(!policy.is_retryable(ErrorType::InsufficientFunds));
    }

    #[test]
    fn test_delay_index_clamps_to_last() {
        let policy = RetryPolicy::new(
            10,
            vec![Duration::from_millis(10), Duration::from_millis(20)],
        );
        assert_eq!(policy.delay_for(0), Duration::from_millis(10));
        assert_eq!(policy.delay_for(1), Duration::from_millis(20));
        assert_eq!(policy.delay_for(7), Duration::from_millis(20));
        assert_eq!(RetryPolicy::no_retry().delay_for(3), Duration::ZERO);
    }

    #[test]
    fn test_exponential_sequence() {
        let policy = RetryPolicy::exponential(
            6,
            Duration::from_millis(100),
            Duration::from_secs(30),
            2.0,
            0.0,
        );
        assert_eq!(
            policy.delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
                Duration::from_millis(1600),
            ]
        );
    }

    #[test]
    fn test_max_backoff_cap() {
        let policy = RetryPolicy::exponential(
            4,
            Duration::from_secs(1),
            Duration::from_secs(5),
            10.0,
            0.0,
        );
        assert_eq!(
            policy.delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(5),
                Duration::from_secs(5),
            ]
        );
    }

    #[test]
    fn test_jitter_range() {
        for _ in 0..100 {
            let policy = RetryPolicy::exponential(
                2,
                Duration::from_millis(100),
                Duration::from_secs(30),
                2.0,
                0.2,
            );
            let delay = policy.delays[0];
            assert!(
                delay >= Duration::from_millis(80) && delay <= Duration::from_millis(120),
                "Duration {delay:?} not in expected range 80-120ms"
            );
        }
    }

    #[test]
    fn test_custom_retryable_set() {
        let policy = RetryPolicy::default().with_retryable([ErrorType::Timeout]);
        assert!(policy.is_retryable(ErrorType::Timeout));
        assert!(!policy.is_retryable(ErrorType::Network));
    }
}
