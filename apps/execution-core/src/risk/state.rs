//! Mutable risk state: capital, pnl windows, exposure and trade counters.
//!
//! `RiskState` is owned by [`RiskManager`](super::RiskManager) behind a single
//! lock. Windows roll forward lazily: callers pass the current time and any
//! expired minute/hour/day/week counter is reset before it is read.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::limits::{REDUCED_MODE_UTILIZATION_PCT, RiskLimits, SAFE_MODE_UTILIZATION_PCT};
use super::positions::PositionBook;

/// Risk-derived operating state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradingMode {
    /// Full size.
    #[default]
    Normal,
    /// Half size.
    Reduced,
    /// Quarter size.
    Safe,
    /// No new trades.
    Halted,
}

impl TradingMode {
    /// Size multiplier applied when sizing positions.
    #[must_use]
    pub fn size_multiplier(self) -> Decimal {
        match self {
            Self::Normal => Decimal::ONE,
            Self::Reduced => Decimal::new(5, 1),
            Self::Safe => Decimal::new(25, 2),
            Self::Halted => Decimal::ZERO,
        }
    }

    /// Numeric value for the mode gauge (0 = normal .. 3 = halted).
    #[must_use]
    pub const fn as_gauge(self) -> f64 {
        match self {
            Self::Normal => 0.0,
            Self::Reduced => 1.0,
            Self::Safe => 2.0,
            Self::Halted => 3.0,
        }
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "NORMAL"),
            Self::Reduced => write!(f, "REDUCED"),
            Self::Safe => write!(f, "SAFE"),
            Self::Halted => write!(f, "HALTED"),
        }
    }
}

/// Coarse risk level from the most-utilized limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    /// Under 50% utilization.
    #[default]
    Low,
    /// Under 70%.
    Medium,
    /// Under 90%.
    High,
    /// 90% and above.
    Critical,
}

impl RiskLevel {
    /// Level for a utilization percentage.
    #[must_use]
    pub fn from_utilization(pct: Decimal) -> Self {
        if pct < Decimal::from(50) {
            Self::Low
        } else if pct < Decimal::from(70) {
            Self::Medium
        } else if pct < Decimal::from(90) {
            Self::High
        } else {
            Self::Critical
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Decision-level halt with an explicit reset time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionBreaker {
    /// Why trading was halted.
    pub reason: String,
    /// When it was tripped.
    pub triggered_at: DateTime<Utc>,
    /// When it lapses on its own.
    pub reset_at: DateTime<Utc>,
}

/// Per-limit utilization, in percent of the limit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitUtilization {
    /// Daily loss vs. cap.
    pub daily_loss: Decimal,
    /// Weekly loss vs. cap.
    pub weekly_loss: Decimal,
    /// Drawdown vs. cap.
    pub drawdown: Decimal,
    /// Leverage vs. cap.
    pub leverage: Decimal,
    /// Open positions vs. cap.
    pub positions: Decimal,
}

impl LimitUtilization {
    /// The most-utilized limit.
    #[must_use]
    pub fn max(&self) -> Decimal {
        [
            self.daily_loss,
            self.weekly_loss,
            self.drawdown,
            self.leverage,
            self.positions,
        ]
        .into_iter()
        .max()
        .unwrap_or(Decimal::ZERO)
    }
}

/// Capital, pnl and counters tracked by the risk gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskState {
    /// Capital now.
    pub current_capital: Decimal,
    /// Capital at construction.
    pub initial_capital: Decimal,
    /// All-time peak capital.
    pub peak_capital: Decimal,
    /// Capital at the start of the current day window.
    pub daily_start_capital: Decimal,
    /// Capital at the start of the current week window.
    pub weekly_start_capital: Decimal,
    /// Realized pnl (net of fees) in the day window.
    pub daily_pnl: Decimal,
    /// Realized pnl (net of fees) in the week window.
    pub weekly_pnl: Decimal,
    /// Fees paid in the day window.
    pub daily_fees: Decimal,
    /// Fees paid in the week window.
    pub weekly_fees: Decimal,
    /// Fees paid since construction.
    pub total_fees: Decimal,
    /// Trades opened in the week window.
    pub weekly_trades: u32,
    /// Currently open positions.
    pub open_positions: u32,
    /// Notional of open positions.
    pub total_exposure: Decimal,
    /// `total_exposure / current_capital`.
    pub current_leverage: Decimal,
    /// Decline from peak, in percent.
    pub current_drawdown_pct: Decimal,
    /// Worst drawdown seen, in percent.
    pub max_drawdown_pct: Decimal,
    /// Trades in the minute window.
    pub trades_this_minute: u32,
    /// Trades in the hour window.
    pub trades_this_hour: u32,
    /// Trades in the day window.
    pub trades_today: u32,
    /// Start of the minute window.
    pub minute_reset_at: DateTime<Utc>,
    /// Start of the hour window.
    pub hour_reset_at: DateTime<Utc>,
    /// Start of the day window.
    pub day_reset_at: DateTime<Utc>,
    /// Start of the week window.
    pub week_reset_at: DateTime<Utc>,
    /// Current mode.
    pub trading_mode: TradingMode,
    /// Current level.
    pub risk_level: RiskLevel,
    /// Consecutive closes that were stop-loss exits.
    pub consecutive_stops: u32,
    /// Times of recent stop-loss exits, oldest first.
    pub recent_stops: VecDeque<DateTime<Utc>>,
    /// Active decision-level halt.
    pub circuit_breaker: Option<DecisionBreaker>,
    /// Net position per symbol, from fills.
    #[serde(default)]
    pub positions: PositionBook,
}

impl RiskState {
    /// Fresh state with all windows starting at `now`.
    #[must_use]
    pub fn new(initial_capital: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            current_capital: initial_capital,
            initial_capital,
            peak_capital: initial_capital,
            daily_start_capital: initial_capital,
            weekly_start_capital: initial_capital,
            daily_pnl: Decimal::ZERO,
            weekly_pnl: Decimal::ZERO,
            daily_fees: Decimal::ZERO,
            weekly_fees: Decimal::ZERO,
            total_fees: Decimal::ZERO,
            weekly_trades: 0,
            open_positions: 0,
            total_exposure: Decimal::ZERO,
            current_leverage: Decimal::ZERO,
            current_drawdown_pct: Decimal::ZERO,
            max_drawdown_pct: Decimal::ZERO,
            trades_this_minute: 0,
            trades_this_hour: 0,
            trades_today: 0,
            minute_reset_at: now,
            hour_reset_at: now,
            day_reset_at: now,
            week_reset_at: now,
            trading_mode: TradingMode::Normal,
            risk_level: RiskLevel::Low,
            consecutive_stops: 0,
            recent_stops: VecDeque::new(),
            circuit_breaker: None,
            positions: PositionBook::default(),
        }
    }

    /// Reset any expired window. Returns true when the day window rolled.
    pub fn roll_windows(&mut self, now: DateTime<Utc>) -> bool {
        if now - self.minute_reset_at >= Duration::minutes(1) {
            self.trades_this_minute = 0;
            self.minute_reset_at = now;
        }
        if now - self.hour_reset_at >= Duration::hours(1) {
            self.trades_this_hour = 0;
            self.hour_reset_at = now;
        }

        let day_rolled = now - self.day_reset_at >= Duration::days(1);
        if day_rolled {
            self.trades_today = 0;
            self.daily_pnl = Decimal::ZERO;
            self.daily_fees = Decimal::ZERO;
            self.daily_start_capital = self.current_capital;
            self.day_reset_at = now;
        }
        if now - self.week_reset_at >= Duration::weeks(1) {
            self.weekly_trades = 0;
            self.weekly_pnl = Decimal::ZERO;
            self.weekly_fees = Decimal::ZERO;
            self.weekly_start_capital = self.current_capital;
            self.week_reset_at = now;
        }
        day_rolled
    }

    /// Recompute leverage from exposure and capital.
    pub fn recompute_leverage(&mut self) {
        self.current_leverage = if self.current_capital > Decimal::ZERO {
            (self.total_exposure / self.current_capital).round_dp(6)
        } else {
            Decimal::ZERO
        };
    }

    /// Update the peak and drawdown figures from current capital.
    pub fn update_drawdown(&mut self) {
        if self.current_capital > self.peak_capital {
            self.peak_capital = self.current_capital;
        }
        self.current_drawdown_pct = if self.peak_capital > Decimal::ZERO {
            ((self.peak_capital - self.current_capital) / self.peak_capital * Decimal::ONE_HUNDRED)
                .round_dp(6)
                .max(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };
        self.max_drawdown_pct = self.max_drawdown_pct.max(self.current_drawdown_pct);
    }

    /// Daily loss as % of the day's starting capital (0 when in profit).
    #[must_use]
    pub fn daily_loss_pct(&self) -> Decimal {
        loss_pct(self.daily_pnl, self.daily_start_capital)
    }

    /// Weekly loss as % of the week's starting capital (0 when in profit).
    #[must_use]
    pub fn weekly_loss_pct(&self) -> Decimal {
        loss_pct(self.weekly_pnl, self.weekly_start_capital)
    }

    /// Drop stop exits older than `window` and return how many remain.
    pub fn stops_within(&mut self, window: Duration, now: DateTime<Utc>) -> usize {
        while self
            .recent_stops
            .front()
            .is_some_and(|at| now - *at > window)
        {
            self.recent_stops.pop_front();
        }
        self.recent_stops.len()
    }

    /// Utilization of each limit.
    #[must_use]
    pub fn utilization(&self, limits: &RiskLimits) -> LimitUtilization {
        LimitUtilization {
            daily_loss: ratio_pct(self.daily_loss_pct(), limits.max_daily_loss_pct),
            weekly_loss: ratio_pct(self.weekly_loss_pct(), limits.max_weekly_loss_pct),
            drawdown: ratio_pct(self.current_drawdown_pct, limits.max_drawdown_pct),
            leverage: ratio_pct(self.current_leverage, limits.max_leverage),
            positions: ratio_pct(
                Decimal::from(self.open_positions),
                Decimal::from(limits.max_open_positions),
            ),
        }
    }

    /// Mode implied by the current figures. Idempotent.
    ///
    /// An unexpired decision breaker, a daily loss at its cap, or a drawdown
    /// at its cap halts trading; otherwise daily-loss utilization picks
    /// between normal, reduced and safe.
    #[must_use]
    pub fn derive_mode(&self, limits: &RiskLimits, now: DateTime<Utc>) -> TradingMode {
        if self
            .circuit_breaker
            .as_ref()
            .is_some_and(|breaker| breaker.reset_at > now)
        {
            return TradingMode::Halted;
        }

        let daily = ratio_pct(self.daily_loss_pct(), limits.max_daily_loss_pct);
        if daily >= Decimal::ONE_HUNDRED || self.current_drawdown_pct >= limits.max_drawdown_pct {
            TradingMode::Halted
        } else if daily >= SAFE_MODE_UTILIZATION_PCT {
            TradingMode::Safe
        } else if daily >= REDUCED_MODE_UTILIZATION_PCT {
            TradingMode::Reduced
        } else {
            TradingMode::Normal
        }
    }
}

fn loss_pct(pnl: Decimal, start_capital: Decimal) -> Decimal {
    if pnl >= Decimal::ZERO || start_capital <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (-pnl / start_capital * Decimal::ONE_HUNDRED).round_dp(6)
}

fn ratio_pct(value: Decimal, limit: Decimal) -> Decimal {
    if limit <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (value / limit * Decimal::ONE_HUNDRED).round_dp(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn state() -> (RiskState, DateTime<Utc>) {
        let now = Utc::now();
        (RiskState::new(dec!(10000), now), now)
    }

    #[test]
    fn test_windows_roll_lazily() {
        let (mut state, start) = state();
        state.trades_this_minute = 7;
        state.trades_this_hour = 30;
        state.daily_pnl = dec!(-100);
        state.current_capital = dec!(9900);

        assert!(!state.roll_windows(start + Duration::seconds(30)));
        assert_eq!(state.trades_this_minute, 7);

        state.roll_windows(start + Duration::seconds(61));
        assert_eq!(state.trades_this_minute, 0);
        assert_eq!(state.trades_this_hour, 30);

        assert!(state.roll_windows(start + Duration::hours(25)));
        assert_eq!(state.trades_this_hour, 0);
        assert_eq!(state.daily_pnl, Decimal::ZERO);
        assert_eq!(state.daily_start_capital, dec!(9900));
    }

    #[test]
    fn test_drawdown_measured_from_peak() {
        let (mut state, _) = state();
        state.current_capital = dec!(12000);
        state.update_drawdown();
        assert_eq!(state.peak_capital, dec!(12000));

        state.current_capital = dec!(10800);
        state.update_drawdown();
        assert_eq!(state.current_drawdown_pct, dec!(10));
        assert_eq!(state.max_drawdown_pct, dec!(10));

        state.current_capital = dec!(11400);
        state.update_drawdown();
        assert_eq!(state.current_drawdown_pct, dec!(5));
        assert_eq!(state.max_drawdown_pct, dec!(10));
    }

    #[test]
    fn test_leverage_invariant() {
        let (mut state, _) = state();
        state.total_exposure = dec!(25000);
        state.recompute_leverage();
        assert_eq!(state.current_leverage, dec!(2.5));

        state.current_capital = Decimal::ZERO;
        state.recompute_leverage();
        assert_eq!(state.current_leverage, Decimal::ZERO);
    }

    #[test]
    fn test_mode_follows_daily_loss_utilization() {
        let limits = RiskLimits::default();
        let (mut state, now) = state();

        // Cap is 5% of 10000 = 500.
        for (pnl, mode) in [
            (dec!(-100), TradingMode::Normal),
            (dec!(-250), TradingMode::Reduced),
            (dec!(-400), TradingMode::Safe),
            (dec!(-500), TradingMode::Halted),
        ] {
            state.daily_pnl = pnl;
            assert_eq!(state.derive_mode(&limits, now), mode, "pnl {pnl}");
        }
    }

    #[test]
    fn test_breaker_halts_until_reset_time() {
        let limits = RiskLimits::default();
        let (mut state, now) = state();
        state.circuit_breaker = Some(DecisionBreaker {
            reason: "cascade".into(),
            triggered_at: now,
            reset_at: now + Duration::minutes(5),
        });
        assert_eq!(state.derive_mode(&limits, now), TradingMode::Halted);
        assert_eq!(
            state.derive_mode(&limits, now + Duration::minutes(6)),
            TradingMode::Normal
        );
    }

    #[test]
    fn test_stops_within_window() {
        let (mut state, now) = state();
        state.recent_stops.extend([
            now - Duration::minutes(30),
            now - Duration::minutes(5),
            now - Duration::minutes(1),
        ]);
        assert_eq!(state.stops_within(Duration::minutes(15), now), 2);
        assert_eq!(state.recent_stops.len(), 2);
    }

    #[test]
    fn test_risk_level_bands() {
        assert_eq!(RiskLevel::from_utilization(dec!(49.9)), RiskLevel::Low);
        assert_eq!(RiskLevel::from_utilization(dec!(50)), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_utilization(dec!(75)), RiskLevel::High);
        assert_eq!(RiskLevel::from_utilization(dec!(90)), RiskLevel::Critical);
    }
}
