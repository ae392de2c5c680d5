//! Engine error types.

use thiserror::Error;

use crate::resilience::ResilienceError;

/// Errors raised by the execution engine.
///
/// Per-order venue failures never surface here; they become failed
/// [`ExecutionResult`](super::ExecutionResult)s. These errors cover the
/// submission boundary and the engine lifecycle.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// The order names a venue that was never registered.
    #[error("unknown venue: {venue}")]
    UnknownVenue {
        /// Venue name as given.
        venue: String,
    },

    /// A venue with this name is already registered.
    #[error("venue already registered: {name}")]
    DuplicateVenue {
        /// Venue name.
        name: String,
    },

    /// No venue is registered and the order does not name one.
    #[error("no venues registered")]
    NoVenues,

    /// Venue configuration rejected at registration.
    #[error("invalid venue config for {name}: {reason}")]
    InvalidVenueConfig {
        /// Venue name.
        name: String,
        /// What was wrong.
        reason: String,
    },

    /// The order failed boundary validation.
    #[error("invalid order: {reason}")]
    InvalidOrder {
        /// What was wrong.
        reason: String,
    },

    /// `start` has not been called.
    #[error("engine not started")]
    NotRunning,

    /// `start` was called twice.
    #[error("engine already started")]
    AlreadyRunning,

    /// The engine is shutting down and accepts no new orders.
    #[error("engine is shutting down")]
    ShuttingDown,

    /// A worker's input channel is closed.
    #[error("worker {worker_id} channel closed")]
    WorkerUnavailable {
        /// Worker index.
        worker_id: usize,
    },

    /// A venue call failed after the resilience layer gave up.
    #[error(transparent)]
    Venue(#[from] ResilienceError),
}

impl EngineError {
    /// Short machine-readable code used in results and HTTP responses.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::UnknownVenue { .. } => "UNKNOWN_VENUE",
            Self::DuplicateVenue { .. } => "DUPLICATE_VENUE",
            Self::NoVenues => "NO_VENUES",
            Self::InvalidVenueConfig { .. } => "INVALID_VENUE_CONFIG",
            Self::InvalidOrder { .. } => "INVALID_ORDER",
            Self::NotRunning => "NOT_RUNNING",
            Self::AlreadyRunning => "ALREADY_RUNNING",
            Self::ShuttingDown => "SHUTTING_DOWN",
            Self::WorkerUnavailable { .. } => "WORKER_UNAVAILABLE",
            Self::Venue(_) => "VENUE_ERROR",
        }
    }
}
