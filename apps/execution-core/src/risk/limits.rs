//! Immutable risk limit configuration.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Daily-loss utilization at which trading drops to [`TradingMode::Reduced`](super::TradingMode::Reduced).
pub const REDUCED_MODE_UTILIZATION_PCT: Decimal = dec!(50);

/// Daily-loss utilization at which trading drops to [`TradingMode::Safe`](super::TradingMode::Safe).
pub const SAFE_MODE_UTILIZATION_PCT: Decimal = dec!(80);

/// Hard limits enforced by the risk gate.
///
/// Percentages are expressed as whole numbers (`5` means 5%).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLimits {
    /// Maximum effective leverage (`leverage * notional / capital`).
    pub max_leverage: Decimal,
    /// Maximum notional of one position as % of capital. Larger requests are shrunk.
    pub max_position_size_pct: Decimal,
    /// Maximum concurrently open positions.
    pub max_open_positions: u32,
    /// Daily loss cap as % of the day's starting capital.
    pub max_daily_loss_pct: Decimal,
    /// Weekly loss cap as % of the week's starting capital.
    pub max_weekly_loss_pct: Decimal,
    /// Drawdown cap as % below the all-time peak.
    pub max_drawdown_pct: Decimal,
    /// Trades allowed per rolling minute.
    pub max_trades_per_minute: u32,
    /// Trades allowed per rolling hour.
    pub max_trades_per_hour: u32,
    /// Trades allowed per rolling day.
    pub max_trades_per_day: u32,
    /// Recommended ceiling for fees plus slippage as % of notional (warning only).
    pub max_cost_pct: Decimal,
    /// Slippage tolerance as % of price.
    pub max_slippage_pct: Decimal,
    /// Minimum distance, as % of the liquidation distance, the stop must leave.
    pub liquidation_buffer_pct: Decimal,
    /// Leverage utilization treated as a margin call.
    pub margin_call_threshold_pct: Decimal,
    /// Capital % risked across the stop distance when sizing.
    pub default_risk_per_trade_pct: Decimal,
    /// Stop-loss exits within the window that count as a cascade.
    pub stop_cascade_threshold: u32,
    /// Trailing window for cascade detection, in seconds.
    pub stop_cascade_window_secs: u64,
    /// How long a cascade halt lasts, in seconds.
    pub cascade_halt_secs: u64,
    /// Limit utilization (%) at which an approach alert is raised.
    pub alert_threshold_pct: Decimal,
    /// Alerts retained.
    pub max_alerts: usize,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_leverage: Decimal::from(3),
            max_position_size_pct: Decimal::from(10),
            max_open_positions: 5,
            max_daily_loss_pct: Decimal::from(5),
            max_weekly_loss_pct: Decimal::from(10),
            max_drawdown_pct: Decimal::from(15),
            max_trades_per_minute: 10,
            max_trades_per_hour: 100,
            max_trades_per_day: 500,
            max_cost_pct: dec!(0.5),
            max_slippage_pct: dec!(0.5),
            liquidation_buffer_pct: Decimal::from(10),
            margin_call_threshold_pct: Decimal::from(80),
            default_risk_per_trade_pct: Decimal::ONE,
            stop_cascade_threshold: 3,
            stop_cascade_window_secs: 900,
            cascade_halt_secs: 3600,
            alert_threshold_pct: Decimal::from(75),
            max_alerts: 100,
        }
    }
}

impl RiskLimits {
    /// Check that every limit is usable.
    ///
    /// # Errors
    ///
    /// Returns a description of the first inconsistent field.
    pub fn validate(&self) -> Result<(), String> {
        let positive = [
            ("max_leverage", self.max_leverage),
            ("max_position_size_pct", self.max_position_size_pct),
            ("max_daily_loss_pct", self.max_daily_loss_pct),
            ("max_weekly_loss_pct", self.max_weekly_loss_pct),
            ("max_drawdown_pct", self.max_drawdown_pct),
            ("max_cost_pct", self.max_cost_pct),
            ("max_slippage_pct", self.max_slippage_pct),
            ("default_risk_per_trade_pct", self.default_risk_per_trade_pct),
            ("alert_threshold_pct", self.alert_threshold_pct),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v <= Decimal::ZERO) {
            return Err(format!("risk.{name} must be positive"));
        }

        let hundred = Decimal::ONE_HUNDRED;
        if self.max_position_size_pct > hundred || self.max_drawdown_pct > hundred {
            return Err("risk percentages of capital cannot exceed 100".to_string());
        }
        if self.liquidation_buffer_pct < Decimal::ZERO || self.liquidation_buffer_pct >= hundred {
            return Err("risk.liquidation_buffer_pct must be in [0, 100)".to_string());
        }
        if self.max_open_positions == 0 {
            return Err("risk.max_open_positions must be at least 1".to_string());
        }
        if self.max_trades_per_minute == 0
            || self.max_trades_per_minute > self.max_trades_per_hour
            || self.max_trades_per_hour > self.max_trades_per_day
        {
            return Err("risk trade frequency caps must satisfy 0 < minute <= hour <= day".to_string());
        }
        if self.stop_cascade_threshold < 2 {
            return Err("risk.stop_cascade_threshold must be at least 2".to_string());
        }
        if self.max_alerts == 0 {
            return Err("risk.max_alerts must be at least 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(RiskLimits::default().validate().is_ok());
        assert_eq!(REDUCED_MODE_UTILIZATION_PCT, Decimal::from(50));
        assert_eq!(SAFE_MODE_UTILIZATION_PCT, Decimal::from(80));
    }

    #[test]
    fn test_validate_rejects_inconsistent_limits() {
        let zero_leverage = RiskLimits {
            max_leverage: Decimal::ZERO,
            ..RiskLimits::default()
        };
        assert!(zero_leverage.validate().unwrap_err().contains("max_leverage"));

        let inverted = RiskLimits {
            max_trades_per_minute: 200,
            ..RiskLimits::default()
        };
        assert!(inverted.validate().is_err());

        let no_cascade = RiskLimits {
            stop_cascade_threshold: 1,
            ..RiskLimits::default()
        };
        assert!(no_cascade.validate().is_err());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let limits: RiskLimits = serde_yaml_bw::from_str("max_leverage: 5\n").unwrap();
        assert_eq!(limits.max_leverage, Decimal::from(5));
        assert_eq!(limits.max_daily_loss_pct, Decimal::from(5));
    }
}
