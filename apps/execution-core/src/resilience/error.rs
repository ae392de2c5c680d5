//! Structured transport/API errors.
//!
//! Each variant carries the machine-readable payload a caller needs for
//! programmatic recovery (amounts, bounds, retry-after, reset time, reason).

use std::collections::BTreeMap;
use std::time::Duration;

use rust_decimal::Decimal;
use thiserror::Error;

use super::taxonomy::ErrorType;

/// Errors raised at the resilience boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResilienceError {
    /// Connection-level failure.
    #[error("network error: {message}")]
    Network {
        /// Failure description.
        message: String,
    },

    /// Call exceeded its deadline.
    #[error("timeout: {message}")]
    Timeout {
        /// Failure description.
        message: String,
    },

    /// Venue throttled the request.
    #[error("rate limited: {message}")]
    RateLimited {
        /// Failure description.
        message: String,
        /// Venue-advertised wait before the next attempt.
        retry_after: Option<Duration>,
    },

    /// Not enough balance to cover the order.
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        /// Fee-inclusive amount required.
        required: Decimal,
        /// Amount available.
        available: Decimal,
    },

    /// Price outside accepted bounds.
    #[error("invalid price {price}: {message}")]
    InvalidPrice {
        /// Offending price.
        price: Decimal,
        /// Lower bound, if known.
        min: Option<Decimal>,
        /// Upper bound, if known.
        max: Option<Decimal>,
        /// Failure description.
        message: String,
    },

    /// Malformed order.
    #[error("invalid order: {reason}")]
    InvalidOrder {
        /// Why the order is invalid.
        reason: String,
    },

    /// Any other venue error, already classified.
    #[error("{error_type}: {message}")]
    Api {
        /// Canonical type.
        error_type: ErrorType,
        /// Venue message.
        message: String,
    },

    /// A named circuit breaker is open.
    #[error("circuit breaker '{name}' is open, retry in {}ms", reset_in.as_millis())]
    CircuitOpen {
        /// Breaker name.
        name: String,
        /// Time until the next probe is permitted.
        reset_in: Duration,
    },

    /// The global emergency stop is active.
    #[error("emergency stop active: {reason}")]
    EmergencyStop {
        /// Reason recorded when the stop was tripped.
        reason: String,
    },

    /// Backoff sleep interrupted by shutdown.
    #[error("operation '{operation}' cancelled by shutdown")]
    Cancelled {
        /// Operation that was waiting.
        operation: String,
    },
}

impl ResilienceError {
    /// Build an error of the given canonical type from a plain message.
    #[must_use]
    pub fn classified(error_type: ErrorType, message: impl Into<String>) -> Self {
        let message = message.into();
        match error_type {
            ErrorType::Network => Self::Network { message },
            ErrorType::Timeout => Self::Timeout { message },
            ErrorType::RateLimited => Self::RateLimited {
                message,
                retry_after: None,
            },
            ErrorType::InvalidOrder => Self::InvalidOrder { reason: message },
            other => Self::Api {
                error_type: other,
                message,
            },
        }
    }

    /// Canonical type of this error.
    #[must_use]
    pub const fn error_type(&self) -> ErrorType {
        match self {
            Self::Network { .. } => ErrorType::Network,
            Self::Timeout { .. } => ErrorType::Timeout,
            Self::RateLimited { .. } => ErrorType::RateLimited,
            Self::InsufficientFunds { .. } => ErrorType::InsufficientFunds,
            Self::InvalidPrice { .. } => ErrorType::InvalidPrice,
            Self::InvalidOrder { .. } => ErrorType::InvalidOrder,
            Self::Api { error_type, .. } => *error_type,
            Self::CircuitOpen { .. } | Self::EmergencyStop { .. } | Self::Cancelled { .. } => {
                ErrorType::Unknown
            }
        }
    }

    /// Venue-advertised retry delay, if any.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Whether this error is raised by the resilience machinery itself
    /// (open breaker, emergency stop, shutdown) rather than by the call.
    #[must_use]
    pub const fn is_control(&self) -> bool {
        matches!(
            self,
            Self::CircuitOpen { .. } | Self::EmergencyStop { .. } | Self::Cancelled { .. }
        )
    }

    /// Machine-readable detail payload.
    #[must_use]
    pub fn details(&self) -> BTreeMap<String, String> {
        let mut details = BTreeMap::new();
        details.insert("error_type".to_string(), self.error_type().to_string());
        match self {
            Self::RateLimited {
                retry_after: Some(wait),
                ..
            } => {
                details.insert("retry_after_ms".to_string(), wait.as_millis().to_string());
            }
            Self::InsufficientFunds {
                required,
                available,
            } => {
                details.insert("required".to_string(), required.to_string());
                details.insert("available".to_string(), available.to_string());
            }
            Self::InvalidPrice {
                price, min, max, ..
            } => {
                details.insert("price".to_string(), price.to_string());
                if let Some(min) = min {
                    details.insert("min_price".to_string(), min.to_string());
                }
                if let Some(max) = max {
                    details.insert("max_price".to_string(), max.to_string());
                }
            }
            Self::CircuitOpen { name, reset_in } => {
                details.insert("breaker".to_string(), name.clone());
                details.insert("reset_in_ms".to_string(), reset_in.as_millis().to_string());
            }
            Self::EmergencyStop { reason } => {
                details.insert("reason".to_string(), reason.clone());
            }
            _ => {}
        }
        details
    }
}
