// Allow unwrap/expect in tests - tests should panic on unexpected errors
// Allow test-specific patterns and pedantic lints in test code
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Execution Core - Rust Library
//!
//! The trade-execution boundary: accepts order requests, gates them against
//! live risk limits, dispatches them concurrently to venues under
//! throttling, and wraps every venue call in retry / circuit-breaker /
//! emergency-stop discipline.
//!
//! # Components (leaves first)
//!
//! - [`resilience`]: error taxonomy, retry with backoff, named circuit
//!   breakers, global emergency stop, bounded error history
//! - [`risk`]: pre-trade validation and the trading-mode state machine
//! - [`engine`]: batching, worker pool, per-venue and global throttling,
//!   execution metrics, capacity licensing
//!
//! # Control flow
//!
//! ```text
//! caller -> RiskManager::validate_trade -> ExecutionEngine::submit
//!        -> batch flush -> worker -> ResilienceHandler::guarded -> venue
//!        -> ExecutionResult -> listeners (RiskRecorder) + metrics sink
//! ```
//!
//! [`context::TradingContext`] wires the three together from [`config::Config`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Core components
// =============================================================================

/// Error taxonomy, retry, circuit breakers and emergency stop.
pub mod resilience;

/// Risk gate.
pub mod risk;

/// Batched multi-venue execution engine.
pub mod engine;

// =============================================================================
// Ambient
// =============================================================================

/// Configuration loading and validation.
pub mod config;

/// Application context.
pub mod context;

/// API error mapping.
pub mod error;

/// Prometheus metrics.
pub mod observability;

/// State snapshots.
pub mod persistence;

/// Status API.
pub mod server;

/// Logging and OpenTelemetry setup.
pub mod telemetry;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{Config, ConfigError, load_config, load_config_from_string};
pub use context::{BalanceSource, PlaceOrderOutcome, RiskRecorder, TradingContext};
pub use engine::{
    EngineError, EngineMetrics, ExecutionEngine, ExecutionListener, ExecutionResult, Order,
    OrderSide, OrderStatus, OrderType, VenueAdapter, VenueConfig,
};
pub use resilience::{ErrorType, ResilienceError, ResilienceHandler, RetryPolicy};
pub use risk::{RiskLimits, RiskManager, TradeRequest, TradingMode, ValidationOutcome};
