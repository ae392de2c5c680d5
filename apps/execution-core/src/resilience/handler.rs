//! The resilience handler: one object that owns the error history, the
//! named circuit breakers and the emergency stop, and wraps external calls.
//!
//! Constructed once at the application root and shared by reference.
//! All mutable state sits behind short critical sections; backoff sleeps
//! happen with no lock held and are cancelled by the shutdown token.

use std::future::Future;

use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::observability::metrics;

use super::circuit_breaker::{Admission, BreakerSettings, CircuitBreakerRegistry};
use super::emergency::{EmergencyStatus, EmergencyStop};
use super::error::ResilienceError;
use super::history::{
    BoundedHistory, DEFAULT_HISTORY_CAP, DEFAULT_HISTORY_TRIM, ErrorRecord, ErrorStats,
    RecoveryRecord,
};
use super::retry::RetryPolicy;
use super::taxonomy::{ApiErrorClassification, ApiErrorMapper};

/// Runtime settings for [`ResilienceHandler`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResilienceSettings {
    /// Consecutive exhausted retry sequences that trip the emergency stop.
    pub emergency_failure_threshold: u32,
    /// Error history capacity.
    pub history_cap: usize,
    /// Length the history is trimmed to on overflow.
    pub history_trim: usize,
    /// Defaults for lazily created breakers.
    pub breaker: BreakerSettings,
    /// Default retry policy.
    pub retry: RetryPolicy,
    /// Margin percentage under which balance checks warn.
    pub low_margin_warning_pct: Decimal,
    /// Records included in [`ErrorStats::recent`].
    pub recent_errors_in_stats: usize,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            emergency_failure_threshold: 5,
            history_cap: DEFAULT_HISTORY_CAP,
            history_trim: DEFAULT_HISTORY_TRIM,
            breaker: BreakerSettings::default(),
            retry: RetryPolicy::default(),
            low_margin_warning_pct: Decimal::from(5),
            recent_errors_in_stats: 20,
        }
    }
}

/// Outcome of a fee-inclusive balance check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceCheck {
    /// Whether `available` covers the fee-inclusive requirement.
    pub sufficient: bool,
    /// `required * (1 + fee_rate)`.
    pub required_with_fees: Decimal,
    /// Balance available.
    pub available: Decimal,
    /// `available - required_with_fees` (negative when short).
    pub margin: Decimal,
    /// Margin as a percentage of `available`.
    pub margin_pct: Decimal,
    /// Set when the margin is thin.
    pub warning: Option<String>,
}

impl BalanceCheck {
    /// Convert an insufficient check into a structured error.
    #[must_use]
    pub fn to_error(&self) -> Option<ResilienceError> {
        (!self.sufficient).then(|| ResilienceError::InsufficientFunds {
            required: self.required_with_fees,
            available: self.available,
        })
    }
}

#[derive(Debug)]
struct HandlerState {
    errors: BoundedHistory<ErrorRecord>,
    recoveries: BoundedHistory<RecoveryRecord>,
    consecutive_failures: u32,
}

/// Retry, circuit breaking, error classification and emergency stop.
#[derive(Debug)]
pub struct ResilienceHandler {
    settings: ResilienceSettings,
    state: Mutex<HandlerState>,
    breakers: CircuitBreakerRegistry,
    emergency: EmergencyStop,
    mapper: ApiErrorMapper,
    shutdown: CancellationToken,
}

impl ResilienceHandler {
    /// Create a handler.
    #[must_use]
    pub fn new(settings: ResilienceSettings, shutdown: CancellationToken) -> Self {
        Self {
            state: Mutex::new(HandlerState {
                errors: BoundedHistory::new(settings.history_cap, settings.history_trim),
                recoveries: BoundedHistory::new(settings.history_cap, settings.history_trim),
                consecutive_failures: 0,
            }),
            breakers: CircuitBreakerRegistry::new(settings.breaker),
            emergency: EmergencyStop::new(),
            mapper: ApiErrorMapper::default(),
            shutdown,
            settings,
        }
    }

    /// Replace the venue error mapper.
    #[must_use]
    pub fn with_mapper(mut self, mapper: ApiErrorMapper) -> Self {
        self.mapper = mapper;
        self
    }

    /// Settings in use.
    #[must_use]
    pub const fn settings(&self) -> &ResilienceSettings {
        &self.settings
    }

    /// The named breakers.
    #[must_use]
    pub const fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    /// The emergency stop.
    #[must_use]
    pub const fn emergency(&self) -> &EmergencyStop {
        &self.emergency
    }

    /// Shutdown token used to cancel backoff sleeps.
    #[must_use]
    pub const fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Fail fast if the emergency stop is active.
    pub fn ensure_not_stopped(&self) -> Result<(), ResilienceError> {
        match self.emergency.active_reason() {
            Some(reason) => Err(ResilienceError::EmergencyStop { reason }),
            None => Ok(()),
        }
    }

    /// Run `f` with retries according to `policy`.
    ///
    /// - Fails fast while the emergency stop is active.
    /// - Retryable failures are recorded, then retried after
    ///   `policy.delay_for(attempt)` or the failure's own retry-after.
    /// - Terminal failures and control errors (open breaker, emergency stop,
    ///   shutdown) return immediately and do not count as an exhausted sequence.
    /// - When attempts run out, the consecutive-failure counter increments;
    ///   reaching the threshold trips the emergency stop before the final
    ///   error is returned.
    pub async fn with_retry<T, F, Fut>(
        &self,
        operation: &str,
        policy: &RetryPolicy,
        mut f: F,
    ) -> Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            self.ensure_not_stopped()?;
            attempt += 1;

            let err = match f().await {
                Ok(value) => {
                    self.on_success(operation, attempt);
                    return Ok(value);
                }
                Err(err) => err,
            };

            if err.is_control() {
                return Err(err);
            }

            let error_type = err.error_type();
            self.record_error(
                ErrorRecord::new(error_type, err.to_string(), operation)
                    .with_retry_count(attempt - 1)
                    .with_details(err.details()),
            );

            if !policy.is_retryable(error_type) {
                tracing::debug!(operation, %error_type, "Terminal error, not retrying");
                return Err(err);
            }

            if attempt >= policy.max_attempts {
                self.on_exhausted(operation, attempt, &err);
                return Err(err);
            }

            let delay = err
                .retry_after()
                .unwrap_or_else(|| policy.delay_for(attempt - 1));
            metrics::record_retry_attempt(operation, error_type.as_str());
            tracing::warn!(
                operation,
                attempt,
                max_attempts = policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retryable failure, backing off"
            );

            tokio::select! {
                () = self.shutdown.cancelled() => {
                    return Err(ResilienceError::Cancelled {
                        operation: operation.to_string(),
                    });
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Run `f` through breaker `name`.
    ///
    /// While the breaker is open the call fails fast with
    /// [`ResilienceError::CircuitOpen`]; after the cooldown exactly one probe
    /// is admitted.
    pub async fn circuit_breaker<T, F, Fut>(
        &self,
        name: &str,
        settings: Option<BreakerSettings>,
        f: F,
    ) -> Result<T, ResilienceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        let admission = self.breakers.try_acquire(name, settings)?;
        if admission == Admission::Probe {
            metrics::set_circuit_breaker_state(name, self.breakers.state(name).as_gauge());
        }

        let result = f().await;
        match &result {
            Ok(_) => self.breakers.record_success(name, admission),
            Err(err) if err.is_control() && admission == Admission::Normal => {}
            Err(_) => {
                self.breakers.record_failure(name, admission);
            }
        }
        metrics::set_circuit_breaker_state(name, self.breakers.state(name).as_gauge());
        result
    }

    /// Retry wrapper around a breaker-protected call, with the breaker named
    /// after the operation. Each attempt passes through the breaker.
    pub async fn guarded<T, F, Fut>(
        &self,
        name: &str,
        policy: &RetryPolicy,
        mut f: F,
    ) -> Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        self.with_retry(name, policy, move || {
            let call = f();
            self.circuit_breaker(name, None, move || call)
        })
        .await
    }

    /// Classify venue error messages and record the failure.
    pub fn handle_api_error<S: AsRef<str>>(
        &self,
        messages: &[S],
        operation: &str,
    ) -> ApiErrorClassification {
        let classification = self.mapper.classify(messages);
        let message = messages
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<&str>>()
            .join("; ");

        let mut record = ErrorRecord::new(classification.error_type, message, operation);
        record
            .details
            .insert("retryable".to_string(), classification.retryable.to_string());
        record
            .details
            .insert("recovery_hint".to_string(), classification.recovery_hint.clone());
        self.record_error(record);

        classification
    }

    /// Fee-inclusive balance sufficiency check.
    #[must_use]
    pub fn check_balance_sufficient(
        &self,
        required: Decimal,
        available: Decimal,
        fee_rate: Decimal,
    ) -> BalanceCheck {
        check_balance(
            required,
            available,
            fee_rate,
            self.settings.low_margin_warning_pct,
        )
    }

    /// Trip the emergency stop. Idempotent: the first reason is kept.
    pub fn emergency_stop(&self, reason: &str) -> bool {
        let tripped = self.emergency.trigger(reason);
        if tripped {
            metrics::set_emergency_stop(true);
        }
        tripped
    }

    /// Clear the emergency stop and the consecutive-failure counter.
    pub fn reset_emergency_stop(&self) -> Option<String> {
        self.state.lock().consecutive_failures = 0;
        metrics::set_emergency_stop(false);
        self.emergency.reset()
    }

    /// Emergency stop snapshot.
    #[must_use]
    pub fn emergency_status(&self) -> EmergencyStatus {
        self.emergency.status()
    }

    /// Append a record to the error history.
    pub fn record_error(&self, record: ErrorRecord) {
        self.state.lock().errors.push(record);
    }

    /// Aggregated error statistics.
    #[must_use]
    pub fn get_error_stats(&self) -> ErrorStats {
        let state = self.state.lock();
        let mut stats = ErrorStats::from_history(&state.errors, self.settings.recent_errors_in_stats);
        stats.recoveries = state.recoveries.len();
        stats.consecutive_failures = state.consecutive_failures;
        drop(state);

        let emergency = self.emergency.status();
        stats.emergency_stop_active = emergency.active;
        stats.emergency_stop_reason = emergency.reason;
        stats.circuit_breakers = self.breakers.all_metrics();
        stats
    }

    /// Newest `n` error records.
    #[must_use]
    pub fn recent_errors(&self, n: usize) -> Vec<ErrorRecord> {
        self.state.lock().errors.tail(n)
    }

    /// Newest `n` recovery records.
    #[must_use]
    pub fn recent_recoveries(&self, n: usize) -> Vec<RecoveryRecord> {
        self.state.lock().recoveries.tail(n)
    }

    /// Current consecutive-failure count.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.state.lock().consecutive_failures
    }

    /// Reload history from a snapshot (oldest first).
    pub fn restore_history(&self, errors: Vec<ErrorRecord>, recoveries: Vec<RecoveryRecord>) {
        let mut state = self.state.lock();
        state.errors.clear();
        state.recoveries.clear();
        for record in errors {
            state.errors.push(record);
        }
        for record in recoveries {
            state.recoveries.push(record);
        }
    }

    /// Flag the newest `n` unresolved records of `operation` as resolved.
    ///
    /// Returns how many records changed.
    pub fn mark_resolved(&self, operation: &str, n: usize) -> usize {
        let mut state = self.state.lock();
        Self::resolve_latest(&mut state, operation, n)
    }

    fn resolve_latest(state: &mut HandlerState, operation: &str, n: usize) -> usize {
        let mut resolved = 0;
        for record in state
            .errors
            .iter_mut()
            .rev()
            .filter(|r| r.operation == operation && !r.resolved)
            .take(n)
        {
            record.resolved = true;
            resolved += 1;
        }
        resolved
    }

    fn on_success(&self, operation: &str, attempts: u32) {
        let mut state = self.state.lock();
        state.consecutive_failures = 0;
        if attempts <= 1 {
            return;
        }

        Self::resolve_latest(&mut state, operation, (attempts - 1) as usize);
        state.recoveries.push(RecoveryRecord {
            timestamp: Utc::now(),
            operation: operation.to_string(),
            attempts,
        });
        drop(state);

        tracing::info!(operation, attempts, "Operation recovered after retries");
    }

    fn on_exhausted(&self, operation: &str, attempts: u32, err: &ResilienceError) {
        let consecutive = {
            let mut state = self.state.lock();
            state.consecutive_failures += 1;
            state.consecutive_failures
        };

        tracing::error!(
            operation,
            attempts,
            consecutive,
            error = %err,
            "Retries exhausted"
        );

        if consecutive >= self.settings.emergency_failure_threshold {
            self.emergency_stop(&format!(
                "{consecutive} consecutive failed operations (last: {operation}: {err})"
            ));
        }
    }
}

/// Fee-inclusive balance check.
#[must_use]
pub fn check_balance(
    required: Decimal,
    available: Decimal,
    fee_rate: Decimal,
    warning_pct: Decimal,
) -> BalanceCheck {
    let required_with_fees = required * (Decimal::ONE + fee_rate);
    let margin = available - required_with_fees;
    let sufficient = margin >= Decimal::ZERO;
    let margin_pct = if available > Decimal::ZERO {
        (margin / available * Decimal::ONE_HUNDRED).round_dp(4)
    } else {
        Decimal::ZERO
    };

    let warning = (sufficient && margin_pct < warning_pct).then(|| {
        tracing::warn!(
            %required_with_fees,
            %available,
            %margin_pct,
            "Low balance margin"
        );
        format!("low margin: {margin_pct}% of available balance remains after this order")
    });

    BalanceCheck {
        sufficient,
        required_with_fees,
        available,
        margin,
        margin_pct,
        warning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::taxonomy::ErrorType;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn handler(threshold: u32) -> ResilienceHandler {
        ResilienceHandler::new(
            ResilienceSettings {
                emergency_failure_threshold: threshold,
                ..ResilienceSettings::default()
            },
            CancellationToken::new(),
        )
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, vec![Duration::from_millis(1)])
    }

    #[tokio::test]
    async fn test_succeeds_after_k_retryable_failures() {
        let handler = handler(5);
        let calls = AtomicU32::new(0);
        let k = 2;

        let result = handler
            .with_retry("venue:alpha", &fast_policy(4), || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < k {
                    Err(ResilienceError::classified(ErrorType::Timeout, "slow"))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result, Ok(k));
        assert_eq!(calls.load(Ordering::SeqCst), k + 1);
        assert_eq!(handler.recent_recoveries(10).len(), 1);
        assert!(handler.recent_errors(10).iter().all(|r| r.resolved));
    }

    #[tokio::test]
    async fn test_terminal_error_is_not_retried() {
        let handler = handler(5);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = handler
            .with_retry("venue:alpha", &fast_policy(5), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ResilienceError::InvalidOrder {
                    reason: "bad size".into(),
                })
            })
            .await;

        assert!(matches!(result, Err(ResilienceError::InvalidOrder { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(handler.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_exhaustion_trips_emergency_stop() {
        let handler = handler(2);
        let policy = fast_policy(2);

        for _ in 0..2 {
            let result: Result<(), _> = handler
                .with_retry("venue:alpha", &policy, || async {
                    Err(ResilienceError::classified(ErrorType::Network, "reset"))
                })
                .await;
            assert!(matches!(result, Err(ResilienceError::Network { .. })));
        }

        assert!(handler.emergency().is_active());

        let calls = AtomicU32::new(0);
        let result = handler
            .with_retry("venue:alpha", &policy, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(ResilienceError::EmergencyStop { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        handler.reset_emergency_stop();
        assert_eq!(handler.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_overrides_table() {
        let handler = handler(5);
        let policy = RetryPolicy::new(2, vec![Duration::from_secs(3600)]);
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let result = handler
            .with_retry("venue:alpha", &policy, || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ResilienceError::RateLimited {
                        message: "slow down".into(),
                        retry_after: Some(Duration::from_millis(500)),
                    })
                } else {
                    Ok(())
                }
            })
            .await;

        assert!(result.is_ok());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_backoff_cancelled_by_shutdown() {
        let token = CancellationToken::new();
        let handler = ResilienceHandler::new(ResilienceSettings::default(), token.clone());
        let policy = RetryPolicy::new(3, vec![Duration::from_secs(3600)]);
        token.cancel();

        let result: Result<(), _> = handler
            .with_retry("venue:alpha", &policy, || async {
                Err(ResilienceError::classified(ErrorType::Network, "down"))
            })
            .await;
        assert!(matches!(result, Err(ResilienceError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn test_circuit_breaker_threshold_three() {
        let handler = handler(100);
        let settings = Some(BreakerSettings::new(3, Duration::from_millis(50)));
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let result: Result<(), _> = handler
                .circuit_breaker("op", settings, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ResilienceError::classified(ErrorType::Network, "down"))
                })
                .await;
            assert!(result.is_err());
        }

        let result: Result<(), _> = handler
            .circuit_breaker("op", settings, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(ResilienceError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        tokio::time::sleep(Duration::from_millis(60)).await;
        let probe: Result<(), _> = handler
            .circuit_breaker("op", settings, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(probe.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_guarded_stops_at_open_breaker() {
        let handler = ResilienceHandler::new(
            ResilienceSettings {
                breaker: BreakerSettings::new(2, Duration::from_secs(60)),
                ..ResilienceSettings::default()
            },
            CancellationToken::new(),
        );
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = handler
            .guarded("venue:beta", &fast_policy(5), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ResilienceError::classified(ErrorType::Network, "down"))
            })
            .await;

        // Two real failures open the breaker; the third attempt fails fast.
        assert!(matches!(result, Err(ResilienceError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_handle_api_error_records() {
        let handler = handler(5);
        let result = handler.handle_api_error(&["EOrder:Insufficient funds"], "venue:alpha");
        assert_eq!(result.error_type, ErrorType::InsufficientFunds);
        assert!(!result.retryable);

        let stats = handler.get_error_stats();
        assert_eq!(stats.total_errors, 1);
        assert_eq!(stats.by_type[&ErrorType::InsufficientFunds], 1);
    }

    #[test]
    fn test_balance_check() {
        let handler = handler(5);

        let check = handler.check_balance_sufficient(dec!(100), dec!(1000), dec!(0.001));
        assert!(check.sufficient);
        assert_eq!(check.required_with_fees, dec!(100.1));
        assert_eq!(check.margin, dec!(899.9));
        assert!(check.warning.is_none());

        let thin = handler.check_balance_sufficient(dec!(970), dec!(1000), dec!(0.001));
        assert!(thin.sufficient);
        assert!(thin.warning.is_some());

        let short = handler.check_balance_sufficient(dec!(50000), dec!(1000), dec!(0.001));
        assert!(!short.sufficient);
        assert!(matches!(
            short.to_error(),
            Some(ResilienceError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn test_emergency_stop_keeps_first_reason() {
        let handler = handler(5);
        assert!(handler.emergency_stop("first"));
        assert!(!handler.emergency_stop("second"));
        assert_eq!(handler.emergency_status().reason.as_deref(), Some("first"));
        assert_eq!(handler.get_error_stats().emergency_stop_reason.as_deref(), Some("first"));
    }

    #[test]
    fn test_mark_resolved_touches_newest_records_of_operation() {
        let handler = handler(5);
        for operation in ["venue:alpha", "venue:beta", "venue:alpha"] {
            handler.record_error(ErrorRecord::new(ErrorType::Network, "reset", operation));
        }

        assert_eq!(handler.mark_resolved("venue:alpha", 1), 1);
        assert_eq!(handler.get_error_stats().unresolved, 2);
        assert_eq!(handler.mark_resolved("venue:alpha", 5), 1);
        assert_eq!(handler.mark_resolved("venue:alpha", 5), 0);

        let errors = handler.recent_errors(3);
        assert!(!errors[1].resolved);
        assert!(errors[0].resolved && errors[2].resolved);
    }
}
