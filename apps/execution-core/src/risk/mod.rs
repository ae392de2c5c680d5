//! The risk gate.
//!
//! Stateful pre-trade validation against capital, loss, drawdown, leverage
//! and trade-frequency limits, plus the trading-mode state machine
//! (`NORMAL -> REDUCED -> SAFE -> HALTED`).
//!
//! Policy violations are returned as [`ValidationOutcome`] values, never as
//! errors. Some checks shrink the size or only warn; callers must use
//! [`ValidationOutcome::adjusted_size`].
//!
//! # Example
//!
//! ```rust,ignore
//! let outcome = risk.validate_trade(&request);
//! if outcome.accepted {
//!     engine.submit(&request.symbol, request.side, outcome.adjusted_size, Some(request.price), None).await?;
//! }
//! ```

mod alerts;
mod limits;
mod manager;
mod positions;
mod state;
mod validation;

pub use alerts::{AlertCategory, AlertLog, AlertSeverity, RiskAlert};
pub use limits::{REDUCED_MODE_UTILIZATION_PCT, RiskLimits, SAFE_MODE_UTILIZATION_PCT};
pub use manager::{RiskManager, RiskStateSnapshot, RiskStatus, TradeClose};
pub use positions::{FillEffect, NetPosition, PositionBook, Reduction};
pub use state::{DecisionBreaker, LimitUtilization, RiskLevel, RiskState, TradingMode};
pub use validation::{RejectionKind, TradeRequest, ValidationOutcome};
