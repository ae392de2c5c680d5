//! Resilience patterns for external venue calls.
//!
//! Error classification, bounded error history, named circuit breakers,
//! retry with backoff and the process-wide emergency stop, combined in
//! [`ResilienceHandler`].

mod circuit_breaker;
mod emergency;
mod error;
mod handler;
mod history;
mod retry;
mod taxonomy;

pub use circuit_breaker::{
    Admission, BreakerSettings, CircuitBreakerMetrics, CircuitBreakerRegistry,
    CircuitBreakerState, CircuitState,
};
pub use emergency::{EmergencyCallback, EmergencyStatus, EmergencyStop};
pub use error::ResilienceError;
pub use handler::{BalanceCheck, ResilienceHandler, ResilienceSettings, check_balance};
pub use history::{
    BoundedHistory, DEFAULT_HISTORY_CAP, DEFAULT_HISTORY_TRIM, ErrorRecord, ErrorStats,
    RecoveryRecord,
};
pub use retry::{RetryPolicy, default_retryable};
pub use taxonomy::{ApiErrorClassification, ApiErrorMapper, ErrorType};
