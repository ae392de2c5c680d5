//! Resilience Integration Tests
//!
//! Retry exhaustion, breaker trip/fail-fast and emergency stop idempotence
//! through the shared [`ResilienceHandler`].

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use execution_core::resilience::{
    BreakerSettings, CircuitState, ErrorType, ResilienceError, ResilienceHandler,
    ResilienceSettings, RetryPolicy,
};
use test_case::test_case;
use tokio_util::sync::CancellationToken;

fn handler(emergency_failure_threshold: u32) -> ResilienceHandler {
    ResilienceHandler::new(
        ResilienceSettings {
            emergency_failure_threshold,
            ..ResilienceSettings::default()
        },
        CancellationToken::new(),
    )
}

fn immediate(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, vec![Duration::ZERO; max_attempts as usize])
}

#[test_case(1 ; "single attempt")]
#[test_case(3 ; "default attempts")]
#[test_case(5 ; "extended attempts")]
#[tokio::test]
async fn test_retryable_failure_uses_every_attempt(max_attempts: u32) {
    let handler = handler(10);
    let calls = AtomicU32::new(0);

    let result: Result<(), _> = handler
        .with_retry("place_order", &immediate(max_attempts), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ResilienceError::classified(ErrorType::Network, "reset by peer")) }
        })
        .await;

    assert_eq!(result.unwrap_err().error_type(), ErrorType::Network);
    assert_eq!(calls.load(Ordering::SeqCst), max_attempts);
    assert_eq!(handler.consecutive_failures(), 1);
    assert_eq!(handler.get_error_stats().total_errors, max_attempts as usize);
}

#[tokio::test]
async fn test_recovery_after_transient_failure() {
    let handler = handler(10);
    let calls = AtomicU32::new(0);

    let result = handler
        .with_retry("get_balance", &immediate(3), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(ResilienceError::classified(ErrorType::Timeout, "slow"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), 1);
    assert_eq!(handler.consecutive_failures(), 0);
    assert_eq!(handler.get_error_stats().recoveries, 1);
}

#[tokio::test]
async fn test_terminal_failure_is_not_retried() {
    let handler = handler(10);
    let calls = AtomicU32::new(0);

    let result: Result<(), _> = handler
        .with_retry("place_order", &immediate(3), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ResilienceError::classified(
                    ErrorType::InvalidOrder,
                    "size below minimum",
                ))
            }
        })
        .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_breaker_opens_at_threshold_and_fails_fast() {
    let handler = handler(10);
    let settings = BreakerSettings {
        failure_threshold: 3,
        cooldown: Duration::from_secs(60),
        max_backoff_factor: 8,
    };
    let calls = AtomicU32::new(0);

    for _ in 0..3 {
        let result: Result<(), _> = handler
            .circuit_breaker("venue:alpha", Some(settings), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ResilienceError::classified(ErrorType::Timeout, "slow")) }
            })
            .await;
        assert!(result.is_err());
    }
    assert_eq!(handler.breakers().state("venue:alpha"), CircuitState::Open);

    let result: Result<(), _> = handler
        .circuit_breaker("venue:alpha", Some(settings), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;

    assert!(matches!(result, Err(ResilienceError::CircuitOpen { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(handler.breakers().state("venue:beta"), CircuitState::Closed);
}

#[tokio::test]
async fn test_repeated_exhaustion_trips_emergency_stop() {
    let handler = handler(2);

    for _ in 0..2 {
        let _: Result<(), _> = handler
            .with_retry("cancel_order", &immediate(2), || async {
                Err(ResilienceError::classified(ErrorType::Network, "unreachable"))
            })
            .await;
    }

    assert!(handler.emergency().is_active());
    let calls = AtomicU32::new(0);
    let result: Result<(), _> = handler
        .with_retry("cancel_order", &immediate(2), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;
    assert!(matches!(result, Err(ResilienceError::EmergencyStop { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_emergency_stop_is_idempotent() {
    let handler = handler(5);

    assert!(handler.emergency_stop("manual halt"));
    assert!(!handler.emergency_stop("second caller"));

    let status = handler.emergency_status();
    assert!(status.active);
    assert_eq!(status.reason.as_deref(), Some("manual halt"));

    assert_eq!(handler.reset_emergency_stop().as_deref(), Some("manual halt"));
    assert_eq!(handler.reset_emergency_stop(), None);
    assert!(!handler.emergency().is_active());
}
