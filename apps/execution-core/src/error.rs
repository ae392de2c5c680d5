//! API-facing errors for the status server.
//!
//! Component errors ([`EngineError`], [`ResilienceError`],
//! [`PersistenceError`]) map onto a small set of [`ErrorCode`]s, each with a
//! fixed HTTP status.
//!
//! | Code | HTTP | Usage |
//! |------|------|-------|
//! | `INVALID_REQUEST` | 400 | Malformed order or unknown venue |
//! | `NOT_FOUND` | 404 | Nothing to reset |
//! | `CONFLICT` | 409 | Duplicate venue, engine already started |
//! | `RATE_LIMITED` | 429 | Venue rate limit surfaced to the caller |
//! | `INTERNAL_ERROR` | 500 | Persistence or unexpected failure |
//! | `VENUE_ERROR` | 502 | Venue failed after retries |
//! | `UNAVAILABLE` | 503 | Engine stopped, breaker open, emergency stop |

use std::collections::BTreeMap;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::EngineError;
use crate::persistence::PersistenceError;
use crate::resilience::ResilienceError;

/// Error codes returned by the status API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Invalid request format or parameters.
    InvalidRequest,
    /// The target does not exist or is not active.
    NotFound,
    /// The request conflicts with current state.
    Conflict,
    /// Rate limit exceeded.
    RateLimited,
    /// Internal server error.
    InternalError,
    /// Venue failure after retries.
    VenueError,
    /// The core is not accepting work.
    Unavailable,
}

impl ErrorCode {
    /// HTTP status for this code.
    #[must_use]
    pub const fn http_status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict => StatusCode::CONFLICT,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::VenueError => StatusCode::BAD_GATEWAY,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Stable reason string.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::RateLimited => "RATE_LIMITED",
            Self::InternalError => "INTERNAL_ERROR",
            Self::VenueError => "VENUE_ERROR",
            Self::Unavailable => "UNAVAILABLE",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason())
    }
}

/// An error with a code and key-value context, rendered as JSON.
#[derive(Debug, Error)]
pub struct ApiError {
    code: ErrorCode,
    message: String,
    context: Vec<(String, String)>,
}

impl ApiError {
    /// Create a new API error.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: Vec::new(),
        }
    }

    /// Add context to the error.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.push((key.into(), value.into()));
        self
    }

    /// Get the error code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the context.
    #[must_use]
    pub fn context(&self) -> &[(String, String)] {
        &self.context
    }

    /// Invalid request.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    /// Nothing to act on.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// Internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// JSON body for this error.
    #[must_use]
    pub fn to_http_response(&self) -> HttpErrorResponse {
        HttpErrorResponse {
            code: self.code.reason().to_string(),
            message: self.message.clone(),
            details: self.context.iter().cloned().collect(),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code.reason(), self.message)
    }
}

/// HTTP error response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpErrorResponse {
    /// Error code string.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Additional details.
    pub details: BTreeMap<String, String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.code.http_status(), Json(self.to_http_response())).into_response()
    }
}

impl From<ResilienceError> for ApiError {
    fn from(error: ResilienceError) -> Self {
        let code = match &error {
            ResilienceError::EmergencyStop { .. }
            | ResilienceError::CircuitOpen { .. }
            | ResilienceError::Cancelled { .. } => ErrorCode::Unavailable,
            ResilienceError::RateLimited { .. } => ErrorCode::RateLimited,
            ResilienceError::InsufficientFunds { .. }
            | ResilienceError::InvalidPrice { .. }
            | ResilienceError::InvalidOrder { .. } => ErrorCode::InvalidRequest,
            _ => ErrorCode::VenueError,
        };
        let mut api = Self::new(code, error.to_string());
        for (key, value) in error.details() {
            api = api.with_context(key, value);
        }
        api
    }
}

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        let code = match &error {
            EngineError::UnknownVenue { .. }
            | EngineError::NoVenues
            | EngineError::InvalidVenueConfig { .. }
            | EngineError::InvalidOrder { .. } => ErrorCode::InvalidRequest,
            EngineError::DuplicateVenue { .. } | EngineError::AlreadyRunning => ErrorCode::Conflict,
            EngineError::NotRunning
            | EngineError::ShuttingDown
            | EngineError::WorkerUnavailable { .. } => ErrorCode::Unavailable,
            EngineError::Venue(inner) => return Self::from(inner.clone()),
        };
        Self::new(code, error.to_string()).with_context("engine_code", error.code())
    }
}

impl From<PersistenceError> for ApiError {
    fn from(error: PersistenceError) -> Self {
        Self::internal(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_code_http_mapping() {
        assert_eq!(ErrorCode::InvalidRequest.http_status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::Conflict.http_status(), StatusCode::CONFLICT);
        assert_eq!(ErrorCode::RateLimited.http_status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ErrorCode::Unavailable.http_status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_engine_errors_map_to_codes() {
        let unknown = ApiError::from(EngineError::UnknownVenue {
            venue: "nowhere".into(),
        });
        assert_eq!(unknown.code(), ErrorCode::InvalidRequest);
        assert!(
            unknown
                .context()
                .contains(&("engine_code".to_string(), "UNKNOWN_VENUE".to_string()))
        );

        assert_eq!(ApiError::from(EngineError::ShuttingDown).code(), ErrorCode::Unavailable);
        assert_eq!(
            ApiError::from(EngineError::DuplicateVenue { name: "a".into() }).code(),
            ErrorCode::Conflict
        );
    }

    #[test]
    fn test_resilience_errors_carry_details() {
        let error = ApiError::from(ResilienceError::InsufficientFunds {
            required: dec!(100),
            available: dec!(40),
        });
        let body = error.to_http_response();
        assert_eq!(body.code, "INVALID_REQUEST");
        assert_eq!(body.details.get("error_type").map(String::as_str), Some("insufficient_funds"));

        let stopped = ApiError::from(EngineError::Venue(ResilienceError::EmergencyStop {
            reason: "manual".into(),
        }));
        assert_eq!(stopped.code(), ErrorCode::Unavailable);
    }

    #[test]
    fn test_error_display() {
        let error = ApiError::invalid_request("Missing field");
        assert_eq!(error.to_string(), "[INVALID_REQUEST] Missing field");
    }
}
