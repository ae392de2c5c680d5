//! Trade requests and the reject-or-adjust outcome of validating them.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::engine::{OrderSide, OrderType};

/// A proposed trade, as seen by the risk gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRequest {
    /// Instrument symbol.
    pub symbol: String,
    /// Side.
    pub side: OrderSide,
    /// Order type.
    pub order_type: OrderType,
    /// Quantity in instrument units.
    pub size: Decimal,
    /// Entry (or reference) price.
    pub price: Decimal,
    /// Requested leverage multiplier (1 = unlevered).
    #[serde(default = "default_leverage")]
    pub leverage: Decimal,
    /// Protective stop price.
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    /// Expected slippage as % of price.
    #[serde(default)]
    pub expected_slippage_pct: Decimal,
    /// Fee rate as a fraction (0.001 = 10 bps).
    #[serde(default)]
    pub fee_rate: Decimal,
    /// Balance available to fund the trade, when the caller knows it.
    #[serde(default)]
    pub available_balance: Option<Decimal>,
    /// Target venue.
    #[serde(default)]
    pub venue: Option<String>,
}

fn default_leverage() -> Decimal {
    Decimal::ONE
}

impl TradeRequest {
    /// Unlevered request with no stop, fees or slippage.
    #[must_use]
    pub fn new(
        symbol: impl Into<String>,
        side: OrderSide,
        order_type: OrderType,
        size: Decimal,
        price: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type,
            size,
            price,
            leverage: Decimal::ONE,
            stop_loss: None,
            expected_slippage_pct: Decimal::ZERO,
            fee_rate: Decimal::ZERO,
            available_balance: None,
            venue: None,
        }
    }

    /// Set leverage.
    #[must_use]
    pub const fn with_leverage(mut self, leverage: Decimal) -> Self {
        self.leverage = leverage;
        self
    }

    /// Set the stop price.
    #[must_use]
    pub const fn with_stop_loss(mut self, stop: Decimal) -> Self {
        self.stop_loss = Some(stop);
        self
    }

    /// Set expected slippage (% of price).
    #[must_use]
    pub const fn with_slippage_pct(mut self, pct: Decimal) -> Self {
        self.expected_slippage_pct = pct;
        self
    }

    /// Set the fee rate (fraction).
    #[must_use]
    pub const fn with_fee_rate(mut self, rate: Decimal) -> Self {
        self.fee_rate = rate;
        self
    }

    /// Set the available balance.
    #[must_use]
    pub const fn with_available_balance(mut self, balance: Decimal) -> Self {
        self.available_balance = Some(balance);
        self
    }

    /// Route to a venue.
    #[must_use]
    pub fn with_venue(mut self, venue: impl Into<String>) -> Self {
        self.venue = Some(venue.into());
        self
    }

    /// `size * price`.
    #[must_use]
    pub fn notional(&self) -> Decimal {
        self.size * self.price
    }
}

/// Why a trade was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionKind {
    /// Malformed request (non-positive size or price).
    InvalidRequest,
    /// The process-wide emergency stop is active.
    EmergencyStop,
    /// Trading mode is halted by losses or drawdown.
    Halted,
    /// A decision-level circuit breaker is active.
    CircuitBreaker,
    /// Available balance does not cover margin plus fees.
    InsufficientFunds,
    /// Effective leverage over the cap.
    Leverage,
    /// Open-position count at the cap.
    MaxPositions,
    /// Daily loss at the cap.
    DailyLoss,
    /// Weekly loss at the cap.
    WeeklyLoss,
    /// Drawdown at the cap.
    Drawdown,
    /// A trade-frequency cap is met.
    TradeFrequency,
    /// Expected slippage over tolerance.
    Slippage,
}

impl RejectionKind {
    /// Metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::EmergencyStop => "emergency_stop",
            Self::Halted => "halted",
            Self::CircuitBreaker => "circuit_breaker",
            Self::InsufficientFunds => "insufficient_funds",
            Self::Leverage => "leverage",
            Self::MaxPositions => "max_positions",
            Self::DailyLoss => "daily_loss",
            Self::WeeklyLoss => "weekly_loss",
            Self::Drawdown => "drawdown",
            Self::TradeFrequency => "trade_frequency",
            Self::Slippage => "slippage",
        }
    }
}

impl std::fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of `validate_trade`.
///
/// Policy violations are values, not errors: callers branch on `accepted`
/// and must use `adjusted_size`, which may be smaller than requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    /// Whether the trade may proceed.
    pub accepted: bool,
    /// Human-readable summary.
    pub reason: String,
    /// Machine-readable rejection kind.
    pub rejection: Option<RejectionKind>,
    /// Size to use (after soft adjustments).
    pub adjusted_size: Decimal,
    /// Figures behind the decision.
    pub details: BTreeMap<String, String>,
    /// Soft-check warnings.
    pub warnings: Vec<String>,
}

impl ValidationOutcome {
    /// Accepted outcome.
    #[must_use]
    pub fn accept(adjusted_size: Decimal) -> Self {
        Self {
            accepted: true,
            reason: "trade validated".to_string(),
            rejection: None,
            adjusted_size,
            details: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }

    /// Rejected outcome.
    #[must_use]
    pub fn reject(kind: RejectionKind, reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: reason.into(),
            rejection: Some(kind),
            adjusted_size: Decimal::ZERO,
            details: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }

    /// Attach a detail.
    #[must_use]
    pub fn with_detail(mut self, key: &str, value: impl ToString) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }

    /// Attach several details.
    #[must_use]
    pub fn with_details(mut self, details: BTreeMap<String, String>) -> Self {
        self.details.extend(details);
        self
    }

    /// Attach warnings gathered before the decision.
    #[must_use]
    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_request_deserializes_with_defaults() {
        let json = r#"{"symbol":"BTC/USD","side":"BUY","order_type":"LIMIT","size":"0.5","price":"50000"}"#;
        let request: TradeRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.leverage, Decimal::ONE);
        assert_eq!(request.notional(), dec!(25000));
        assert!(request.available_balance.is_none());
    }

    #[test]
    fn test_reject_has_zero_size() {
        let outcome = ValidationOutcome::reject(RejectionKind::Leverage, "too much")
            .with_detail("effective_leverage", dec!(4.2));
        assert!(!outcome.accepted);
        assert_eq!(outcome.adjusted_size, Decimal::ZERO);
        assert_eq!(outcome.details["effective_leverage"], "4.2");
    }
}
