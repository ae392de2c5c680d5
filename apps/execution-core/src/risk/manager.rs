//! The risk gate: pre-trade validation and the trading-mode state machine.
//!
//! One [`RiskManager`] per process, shared by reference. All state lives in a
//! single mutex held only for the duration of a check or an update; nothing
//! sleeps or calls out while it is held.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::engine::OrderSide;
use crate::observability::metrics;
use crate::resilience::ResilienceHandler;

use super::alerts::{AlertCategory, AlertLog, AlertSeverity, RiskAlert};
use super::limits::RiskLimits;
use super::positions::{FillEffect, PositionBook};
use super::state::{DecisionBreaker, LimitUtilization, RiskLevel, RiskState, TradingMode};
use super::validation::{RejectionKind, TradeRequest, ValidationOutcome};

/// A closed trade, as reported to the risk gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeClose {
    /// Notional of the position being closed.
    pub notional: Decimal,
    /// Realized pnl before fees.
    pub pnl: Decimal,
    /// Closing fees.
    pub fees: Decimal,
    /// Whether the exit was a stop-loss.
    pub stopped_out: bool,
}

/// Risk snapshot for observability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskStatus {
    /// Current mode.
    pub trading_mode: TradingMode,
    /// Current level.
    pub risk_level: RiskLevel,
    /// Capital now.
    pub current_capital: Decimal,
    /// Capital at construction.
    pub initial_capital: Decimal,
    /// All-time peak.
    pub peak_capital: Decimal,
    /// Day-window pnl.
    pub daily_pnl: Decimal,
    /// Day-window loss %.
    pub daily_loss_pct: Decimal,
    /// Week-window pnl.
    pub weekly_pnl: Decimal,
    /// Week-window loss %.
    pub weekly_loss_pct: Decimal,
    /// Fees since construction.
    pub total_fees: Decimal,
    /// Open notional.
    pub total_exposure: Decimal,
    /// Exposure over capital.
    pub current_leverage: Decimal,
    /// Decline from peak %.
    pub current_drawdown_pct: Decimal,
    /// Worst decline %.
    pub max_drawdown_pct: Decimal,
    /// Open positions.
    pub open_positions: u32,
    /// Trades in the minute window.
    pub trades_this_minute: u32,
    /// Trades in the hour window.
    pub trades_this_hour: u32,
    /// Trades in the day window.
    pub trades_today: u32,
    /// Consecutive stop-loss exits.
    pub consecutive_stops: u32,
    /// Active decision breaker.
    pub circuit_breaker: Option<DecisionBreaker>,
    /// Per-limit utilization.
    pub utilization: LimitUtilization,
    /// Alerts not yet acknowledged.
    pub unacknowledged_alerts: usize,
    /// Latest alerts, oldest first.
    pub recent_alerts: Vec<RiskAlert>,
}

/// Persisted form of the risk gate's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskStateSnapshot {
    /// State at save time.
    pub state: RiskState,
    /// Alert history at save time.
    #[serde(default)]
    pub alerts: Vec<RiskAlert>,
}

const RECENT_ALERTS_IN_STATUS: usize = 10;

#[derive(Debug)]
struct Inner {
    state: RiskState,
    alerts: AlertLog,
}

/// Stateful pre-trade validator.
#[derive(Debug)]
pub struct RiskManager {
    limits: RiskLimits,
    inner: Mutex<Inner>,
    resilience: Arc<ResilienceHandler>,
}

impl RiskManager {
    /// Create a manager starting from `initial_capital`.
    ///
    /// The resilience handler supplies the emergency stop that every
    /// validation consults first.
    #[must_use]
    pub fn new(
        limits: RiskLimits,
        initial_capital: Decimal,
        resilience: Arc<ResilienceHandler>,
    ) -> Self {
        let alerts = AlertLog::new(limits.max_alerts);
        Self {
            inner: Mutex::new(Inner {
                state: RiskState::new(initial_capital, Utc::now()),
                alerts,
            }),
            limits,
            resilience,
        }
    }

    /// Configured limits.
    #[must_use]
    pub const fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Current trading mode (after rolling windows).
    #[must_use]
    pub fn trading_mode(&self) -> TradingMode {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, Utc::now());
        inner.state.trading_mode
    }

    /// Validate a proposed trade.
    ///
    /// Checks run in a fixed order and stop at the first hard failure:
    ///
    /// 1. emergency stop, halted mode, active decision breaker
    /// 2. available balance covers margin plus fees (when a balance is given)
    /// 3. effective leverage
    /// 4. per-position size cap (shrinks the size, never rejects)
    /// 5. open-position count
    /// 6. daily loss, weekly loss, drawdown
    /// 7. per-minute/hour/day trade frequency
    /// 8. fees plus slippage over the recommended cost (warns only)
    /// 9. slippage tolerance
    /// 10. stop too close to liquidation (warns only)
    /// 11. stop-loss cascade forming (warns and halves the size)
    pub fn validate_trade(&self, request: &TradeRequest) -> ValidationOutcome {
        let outcome = self.evaluate(request, Utc::now());

        metrics::record_risk_decision(outcome.accepted, outcome.rejection.map(RejectionKind::as_str));
        if outcome.accepted {
            tracing::debug!(
                symbol = %request.symbol,
                requested = %request.size,
                adjusted = %outcome.adjusted_size,
                warnings = outcome.warnings.len(),
                "Trade accepted"
            );
        } else {
            tracing::info!(
                symbol = %request.symbol,
                rejection = ?outcome.rejection,
                reason = %outcome.reason,
                "Trade rejected"
            );
        }
        outcome
    }

    fn evaluate(&self, request: &TradeRequest, now: DateTime<Utc>) -> ValidationOutcome {
        if let Some(reason) = self.resilience.emergency().active_reason() {
            return ValidationOutcome::reject(
                RejectionKind::EmergencyStop,
                format!("emergency stop active: {reason}"),
            )
            .with_detail("reason", reason);
        }
        if request.size <= Decimal::ZERO
            || request.price <= Decimal::ZERO
            || request.leverage <= Decimal::ZERO
        {
            return ValidationOutcome::reject(
                RejectionKind::InvalidRequest,
                "size, price and leverage must be positive",
            );
        }

        let mut inner = self.inner.lock();
        self.refresh(&mut inner, now);
        let state = &inner.state;
        let limits = &self.limits;

        if state.trading_mode == TradingMode::Halted {
            if let Some(breaker) = &state.circuit_breaker {
                return ValidationOutcome::reject(
                    RejectionKind::CircuitBreaker,
                    format!("circuit breaker active: {}", breaker.reason),
                )
                .with_detail("reset_at", breaker.reset_at.to_rfc3339());
            }
            return ValidationOutcome::reject(RejectionKind::Halted, "trading halted")
                .with_detail("daily_loss_pct", state.daily_loss_pct())
                .with_detail("drawdown_pct", state.current_drawdown_pct);
        }

        let mut warnings = Vec::new();
        let mut details = BTreeMap::new();
        let capital = state.current_capital;
        let notional = request.notional();
        details.insert("notional".to_string(), notional.to_string());
        details.insert("trading_mode".to_string(), state.trading_mode.to_string());

        if let Some(available) = request.available_balance {
            let margin = notional / request.leverage.max(Decimal::ONE);
            let check = self
                .resilience
                .check_balance_sufficient(margin, available, request.fee_rate);
            if !check.sufficient {
                return ValidationOutcome::reject(
                    RejectionKind::InsufficientFunds,
                    format!(
                        "insufficient funds: need {} available {}",
                        check.required_with_fees, check.available
                    ),
                )
                .with_detail("required", check.required_with_fees)
                .with_detail("available", check.available)
                .with_details(details);
            }
            warnings.extend(check.warning);
        }

        if capital <= Decimal::ZERO {
            return ValidationOutcome::reject(RejectionKind::Leverage, "no capital to lever")
                .with_details(details);
        }
        let effective_leverage = (request.leverage * notional / capital).round_dp(6);
        details.insert("effective_leverage".to_string(), effective_leverage.to_string());
        if effective_leverage > limits.max_leverage {
            return ValidationOutcome::reject(
                RejectionKind::Leverage,
                format!(
                    "leverage {effective_leverage}x exceeds maximum {}x",
                    limits.max_leverage
                ),
            )
            .with_details(details)
            .with_warnings(warnings);
        }

        let mut size = request.size;
        let max_notional = capital * limits.max_position_size_pct / Decimal::ONE_HUNDRED;
        if notional > max_notional {
            size = (max_notional / request.price).round_dp(8);
            details.insert("original_size".to_string(), request.size.to_string());
            warnings.push(format!(
                "position size reduced from {} to {size} ({}% of capital cap)",
                request.size, limits.max_position_size_pct
            ));
        }

        if state.open_positions >= limits.max_open_positions
            && !state.positions.reduces(&request.symbol, request.side)
        {
            return ValidationOutcome::reject(
                RejectionKind::MaxPositions,
                format!("{} positions already open", state.open_positions),
            )
            .with_details(details)
            .with_warnings(warnings);
        }

        let loss_checks = [
            (RejectionKind::DailyLoss, "daily loss", state.daily_loss_pct(), limits.max_daily_loss_pct),
            (RejectionKind::WeeklyLoss, "weekly loss", state.weekly_loss_pct(), limits.max_weekly_loss_pct),
            (RejectionKind::Drawdown, "drawdown", state.current_drawdown_pct, limits.max_drawdown_pct),
        ];
        for (kind, label, value, cap) in loss_checks {
            if value >= cap {
                return ValidationOutcome::reject(
                    kind,
                    format!("{label} {value}% at or above limit {cap}%"),
                )
                .with_details(details)
                .with_warnings(warnings);
            }
        }

        let frequency_checks = [
            ("minute", state.trades_this_minute, limits.max_trades_per_minute),
            ("hour", state.trades_this_hour, limits.max_trades_per_hour),
            ("day", state.trades_today, limits.max_trades_per_day),
        ];
        for (window, count, cap) in frequency_checks {
            if count >= cap {
                return ValidationOutcome::reject(
                    RejectionKind::TradeFrequency,
                    format!("{count} trades this {window} (limit {cap})"),
                )
                .with_details(details)
                .with_warnings(warnings);
            }
        }

        let cost_pct = request.fee_rate * Decimal::ONE_HUNDRED + request.expected_slippage_pct;
        details.insert("cost_pct".to_string(), cost_pct.to_string());
        if cost_pct > limits.max_cost_pct {
            warnings.push(format!(
                "fees plus slippage {cost_pct}% above recommended {}%",
                limits.max_cost_pct
            ));
        }

        if request.expected_slippage_pct > limits.max_slippage_pct {
            return ValidationOutcome::reject(
                RejectionKind::Slippage,
                format!(
                    "expected slippage {}% exceeds tolerance {}%",
                    request.expected_slippage_pct, limits.max_slippage_pct
                ),
            )
            .with_details(details)
            .with_warnings(warnings);
        }

        if let Some(stop) = request.stop_loss {
            warnings.extend(self.liquidation_warning(request, stop));
        }

        let recent_stops = state.recent_stops.len();
        let cascade_floor = limits.stop_cascade_threshold.saturating_sub(1) as usize;
        if recent_stops >= cascade_floor {
            size = (size / Decimal::TWO).round_dp(8);
            warnings.push(format!(
                "{recent_stops} recent stop-loss exits, size halved to {size}"
            ));
        }

        let leverage_util = state.utilization(limits).leverage;
        if leverage_util >= limits.margin_call_threshold_pct {
            warnings.push(format!(
                "account leverage at {leverage_util}% of limit (margin call threshold {}%)",
                limits.margin_call_threshold_pct
            ));
        }

        ValidationOutcome::accept(size)
            .with_details(details)
            .with_warnings(warnings)
    }

    fn liquidation_warning(&self, request: &TradeRequest, stop: Decimal) -> Option<String> {
        if request.leverage <= Decimal::ONE {
            return None;
        }
        let liquidation_distance = Decimal::ONE_HUNDRED / request.leverage;
        let stop_distance = ((request.price - stop).abs() / request.price * Decimal::ONE_HUNDRED).round_dp(6);
        if stop_distance >= liquidation_distance {
            return Some(format!(
                "stop distance {stop_distance}% is beyond the liquidation distance {liquidation_distance}%"
            ));
        }
        let buffer = ((liquidation_distance - stop_distance) / liquidation_distance * Decimal::ONE_HUNDRED).round_dp(4);
        (buffer < self.limits.liquidation_buffer_pct).then(|| {
            format!(
                "stop leaves {buffer}% buffer before liquidation (minimum {}%)",
                self.limits.liquidation_buffer_pct
            )
        })
    }

    /// Record a newly opened position.
    pub fn record_trade_open(&self, notional: Decimal, fees: Decimal) {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        inner.state.roll_windows(now);

        Self::count_trade(&mut inner.state);
        Self::add_exposure(&mut inner.state, notional, fees, true);
        self.check_leverage(&mut inner);
        self.apply_mode(&mut inner, now);
    }

    /// Record a closed position and re-derive the trading mode.
    ///
    /// A stop-loss exit that brings the cascade count to its threshold
    /// halts trading for the configured cascade duration.
    pub fn record_trade_close(&self, close: &TradeClose) {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        inner.state.roll_windows(now);

        self.realize(&mut inner, close, true, now);
        self.apply_mode(&mut inner, now);
    }

    /// Record an executed fill against the per-symbol position book.
    ///
    /// Fills that add to a position (or open one) raise exposure; fills on
    /// the opposite side close it and realize pnl against the entry price.
    /// Fees are split between the two parts by quantity.
    pub fn record_fill(
        &self,
        symbol: &str,
        side: OrderSide,
        amount: Decimal,
        price: Decimal,
        fees: Decimal,
    ) -> FillEffect {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        inner.state.roll_windows(now);

        let effect = inner.state.positions.apply(symbol, side, amount, price);
        Self::count_trade(&mut inner.state);

        let mut open_fees = fees;
        if let Some(reduction) = effect.reduction {
            let close_fees = if amount > Decimal::ZERO {
                (fees * reduction.amount / amount).round_dp(8)
            } else {
                fees
            };
            open_fees -= close_fees;
            let close = TradeClose {
                notional: reduction.notional,
                pnl: reduction.pnl,
                fees: close_fees,
                stopped_out: false,
            };
            self.realize(&mut inner, &close, reduction.closed, now);
            tracing::debug!(
                symbol = %symbol,
                closed = reduction.closed,
                pnl = %reduction.pnl,
                "Position reduced"
            );
        }
        if effect.added_notional > Decimal::ZERO || effect.reduction.is_none() {
            Self::add_exposure(&mut inner.state, effect.added_notional, open_fees, effect.opened);
            self.check_leverage(&mut inner);
        }

        self.apply_mode(&mut inner, now);
        effect
    }

    /// Open positions by symbol.
    #[must_use]
    pub fn positions(&self) -> PositionBook {
        self.inner.lock().state.positions.clone()
    }

    fn count_trade(state: &mut RiskState) {
        state.trades_this_minute += 1;
        state.trades_this_hour += 1;
        state.trades_today += 1;
        state.weekly_trades += 1;
    }

    fn add_exposure(state: &mut RiskState, notional: Decimal, fees: Decimal, opened: bool) {
        state.total_exposure += notional.abs();
        if opened {
            state.open_positions += 1;
        }
        state.current_capital -= fees;
        state.daily_pnl -= fees;
        state.weekly_pnl -= fees;
        state.daily_fees += fees;
        state.weekly_fees += fees;
        state.total_fees += fees;
        state.recompute_leverage();
        state.update_drawdown();
    }

    fn check_leverage(&self, inner: &mut Inner) {
        let leverage_util = inner.state.utilization(&self.limits).leverage;
        inner.alerts.check_limit(
            AlertCategory::Leverage,
            "leverage",
            leverage_util,
            self.limits.margin_call_threshold_pct,
        );
    }

    fn realize(&self, inner: &mut Inner, close: &TradeClose, closed: bool, now: DateTime<Utc>) {
        let window = Duration::seconds(self.limits.stop_cascade_window_secs as i64);
        let state = &mut inner.state;
        let net = close.pnl - close.fees;
        state.total_exposure = (state.total_exposure - close.notional.abs()).max(Decimal::ZERO);
        if closed {
            state.open_positions = state.open_positions.saturating_sub(1);
        }
        state.current_capital += net;
        state.daily_pnl += net;
        state.weekly_pnl += net;
        state.daily_fees += close.fees;
        state.weekly_fees += close.fees;
        state.total_fees += close.fees;
        if close.stopped_out {
            state.consecutive_stops += 1;
            state.recent_stops.push_back(now);
        } else {
            state.consecutive_stops = 0;
        }
        state.recompute_leverage();
        state.update_drawdown();
        let stops = state.stops_within(window, now);

        if close.stopped_out && stops >= self.limits.stop_cascade_threshold as usize {
            let duration = Duration::seconds(self.limits.cascade_halt_secs as i64);
            let reason = format!(
                "stop-loss cascade: {stops} stops within {}s",
                self.limits.stop_cascade_window_secs
            );
            Self::trip(inner, reason, duration, now);
        }

        let utilization = inner.state.utilization(&self.limits);
        let threshold = self.limits.alert_threshold_pct;
        inner.alerts.check_limit(AlertCategory::DailyLoss, "daily loss", utilization.daily_loss, threshold);
        inner.alerts.check_limit(AlertCategory::WeeklyLoss, "weekly loss", utilization.weekly_loss, threshold);
        inner.alerts.check_limit(AlertCategory::Drawdown, "drawdown", utilization.drawdown, threshold);
        inner.alerts.check_limit(
            AlertCategory::Leverage,
            "leverage",
            utilization.leverage,
            self.limits.margin_call_threshold_pct,
        );
    }

    /// Size a position from a risk budget.
    ///
    /// The budget is `risk_pct` (default from limits) of capital, scaled by
    /// the trading mode, and capped by what is left of the daily-loss and
    /// drawdown allowances. The resulting size is further bounded by the
    /// per-position cap and by the leverage limit. Returns zero when halted
    /// or when entry equals stop.
    pub fn calculate_safe_position_size(
        &self,
        entry: Decimal,
        stop: Decimal,
        leverage: Decimal,
        risk_pct: Option<Decimal>,
    ) -> Decimal {
        let stop_distance = (entry - stop).abs();
        if entry <= Decimal::ZERO || stop_distance.is_zero() || leverage <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let mut inner = self.inner.lock();
        self.refresh(&mut inner, Utc::now());
        let state = &inner.state;
        let limits = &self.limits;

        let multiplier = state.trading_mode.size_multiplier();
        if multiplier.is_zero() || state.current_capital <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let hundred = Decimal::ONE_HUNDRED;
        let risk_pct = risk_pct.unwrap_or(limits.default_risk_per_trade_pct);
        let risk_budget = state.current_capital * risk_pct / hundred * multiplier;

        let daily_allowance = state.daily_start_capital * limits.max_daily_loss_pct / hundred;
        let daily_used = (-state.daily_pnl).max(Decimal::ZERO);
        let daily_remaining = (daily_allowance - daily_used).max(Decimal::ZERO);

        let drawdown_allowance = state.peak_capital * limits.max_drawdown_pct / hundred;
        let drawdown_used = (state.peak_capital - state.current_capital).max(Decimal::ZERO);
        let drawdown_remaining = (drawdown_allowance - drawdown_used).max(Decimal::ZERO);

        let budget = risk_budget.min(daily_remaining).min(drawdown_remaining);
        let by_risk = budget / stop_distance;
        let by_position_cap = state.current_capital * limits.max_position_size_pct / hundred / entry;
        let by_leverage = limits.max_leverage * state.current_capital / (leverage * entry);

        by_risk
            .min(by_position_cap)
            .min(by_leverage)
            .max(Decimal::ZERO)
            .round_dp(8)
    }

    /// Force a decision-level halt until `duration` has passed or an
    /// explicit reset.
    pub fn trigger_circuit_breaker(&self, reason: &str, duration: std::time::Duration) {
        let now = Utc::now();
        let duration = Duration::from_std(duration).unwrap_or(Duration::MAX);
        let mut inner = self.inner.lock();
        Self::trip(&mut inner, reason.to_string(), duration, now);
        self.apply_mode(&mut inner, now);
    }

    /// Clear the decision breaker. Returns its reason if one was active.
    ///
    /// Trading stays halted if losses or drawdown still warrant it.
    pub fn reset_circuit_breaker(&self) -> Option<String> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let breaker = inner.state.circuit_breaker.take()?;
        inner.state.consecutive_stops = 0;
        inner.state.recent_stops.clear();
        inner.alerts.raise(RiskAlert::new(
            AlertSeverity::Info,
            AlertCategory::CircuitBreaker,
            format!("circuit breaker reset (was: {})", breaker.reason),
        ));
        self.apply_mode(&mut inner, now);
        Some(breaker.reason)
    }

    /// Status snapshot for observability.
    #[must_use]
    pub fn get_risk_status(&self) -> RiskStatus {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, Utc::now());
        let state = &inner.state;

        RiskStatus {
            trading_mode: state.trading_mode,
            risk_level: state.risk_level,
            current_capital: state.current_capital,
            initial_capital: state.initial_capital,
            peak_capital: state.peak_capital,
            daily_pnl: state.daily_pnl,
            daily_loss_pct: state.daily_loss_pct(),
            weekly_pnl: state.weekly_pnl,
            weekly_loss_pct: state.weekly_loss_pct(),
            total_fees: state.total_fees,
            total_exposure: state.total_exposure,
            current_leverage: state.current_leverage,
            current_drawdown_pct: state.current_drawdown_pct,
            max_drawdown_pct: state.max_drawdown_pct,
            open_positions: state.open_positions,
            trades_this_minute: state.trades_this_minute,
            trades_this_hour: state.trades_this_hour,
            trades_today: state.trades_today,
            consecutive_stops: state.consecutive_stops,
            circuit_breaker: state.circuit_breaker.clone(),
            utilization: state.utilization(&self.limits),
            unacknowledged_alerts: inner.alerts.unacknowledged(),
            recent_alerts: inner.alerts.recent(RECENT_ALERTS_IN_STATUS),
        }
    }

    /// Acknowledge every alert. Returns how many changed.
    pub fn acknowledge_alerts(&self) -> usize {
        self.inner.lock().alerts.acknowledge_all()
    }

    /// Counters for persistence.
    #[must_use]
    pub fn snapshot(&self) -> RiskStateSnapshot {
        let inner = self.inner.lock();
        RiskStateSnapshot {
            state: inner.state.clone(),
            alerts: inner.alerts.all(),
        }
    }

    /// Reapply persisted counters. Expired windows roll forward immediately.
    pub fn restore(&self, snapshot: RiskStateSnapshot) {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        inner.state = snapshot.state;
        inner.alerts.replace(snapshot.alerts);
        self.refresh(&mut inner, now);

        tracing::info!(
            capital = %inner.state.current_capital,
            mode = %inner.state.trading_mode,
            open_positions = inner.state.open_positions,
            "Risk state restored"
        );
    }

    fn trip(inner: &mut Inner, reason: String, duration: Duration, now: DateTime<Utc>) {
        let reset_at = now.checked_add_signed(duration).unwrap_or(DateTime::<Utc>::MAX_UTC);
        tracing::error!(reason = %reason, reset_at = %reset_at, "Risk circuit breaker tripped");
        inner.alerts.raise(RiskAlert::new(
            AlertSeverity::Critical,
            AlertCategory::CircuitBreaker,
            format!("circuit breaker tripped: {reason}"),
        ));
        inner.state.circuit_breaker = Some(DecisionBreaker {
            reason,
            triggered_at: now,
            reset_at,
        });
    }

    /// Roll windows, expire the decision breaker, prune the stop window and
    /// re-derive mode and level.
    fn refresh(&self, inner: &mut Inner, now: DateTime<Utc>) {
        if inner.state.roll_windows(now) {
            tracing::info!(capital = %inner.state.current_capital, "Daily risk window rolled");
        }

        if inner
            .state
            .circuit_breaker
            .as_ref()
            .is_some_and(|breaker| breaker.reset_at <= now)
        {
            if let Some(breaker) = inner.state.circuit_breaker.take() {
                tracing::info!(reason = %breaker.reason, "Risk circuit breaker cooldown elapsed");
                inner.state.consecutive_stops = 0;
                inner.state.recent_stops.clear();
            }
        }

        let window = Duration::seconds(self.limits.stop_cascade_window_secs as i64);
        inner.state.stops_within(window, now);
        self.apply_mode(inner, now);
    }

    fn apply_mode(&self, inner: &mut Inner, now: DateTime<Utc>) {
        let mode = inner.state.derive_mode(&self.limits, now);
        let previous = inner.state.trading_mode;
        inner.state.risk_level =
            RiskLevel::from_utilization(inner.state.utilization(&self.limits).max());

        if mode == previous {
            return;
        }
        inner.state.trading_mode = mode;
        metrics::set_trading_mode(mode.as_gauge());

        let severity = match mode {
            TradingMode::Halted => AlertSeverity::Critical,
            TradingMode::Normal => AlertSeverity::Info,
            TradingMode::Reduced | TradingMode::Safe => AlertSeverity::Warning,
        };
        inner.alerts.raise(RiskAlert::new(
            severity,
            AlertCategory::TradingMode,
            format!("trading mode {previous} -> {mode}"),
        ));
    }
}
