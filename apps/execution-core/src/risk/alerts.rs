//! Risk alerts raised when a limit is approached or breached.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::resilience::BoundedHistory;

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    /// Informational.
    Info,
    /// A limit is being approached.
    Warning,
    /// A limit was breached or trading halted.
    Critical,
}

/// What the alert is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertCategory {
    /// Daily loss limit.
    DailyLoss,
    /// Weekly loss limit.
    WeeklyLoss,
    /// Drawdown limit.
    Drawdown,
    /// Leverage and margin.
    Leverage,
    /// Stop-loss cascade.
    StopCascade,
    /// Decision-level circuit breaker.
    CircuitBreaker,
    /// Trading mode change.
    TradingMode,
}

/// One alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAlert {
    /// When it was raised.
    pub timestamp: DateTime<Utc>,
    /// Severity.
    pub severity: AlertSeverity,
    /// Category.
    pub category: AlertCategory,
    /// Human-readable message.
    pub message: String,
    /// Whether an operator acknowledged it.
    pub acknowledged: bool,
}

impl RiskAlert {
    /// Unacknowledged alert stamped now.
    #[must_use]
    pub fn new(severity: AlertSeverity, category: AlertCategory, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            severity,
            category,
            message: message.into(),
            acknowledged: false,
        }
    }
}

/// Capped alert history.
#[derive(Debug, Clone)]
pub struct AlertLog {
    alerts: BoundedHistory<RiskAlert>,
}

impl AlertLog {
    /// Log keeping at most `cap` alerts (trimmed to half on overflow).
    #[must_use]
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            alerts: BoundedHistory::new(cap, (cap / 2).max(1)),
        }
    }

    /// Append an alert and log it.
    pub fn raise(&mut self, alert: RiskAlert) {
        match alert.severity {
            AlertSeverity::Critical => tracing::error!(
                category = ?alert.category,
                message = %alert.message,
                "Risk alert"
            ),
            AlertSeverity::Warning => tracing::warn!(
                category = ?alert.category,
                message = %alert.message,
                "Risk alert"
            ),
            AlertSeverity::Info => tracing::info!(
                category = ?alert.category,
                message = %alert.message,
                "Risk alert"
            ),
        }
        self.alerts.push(alert);
    }

    /// Raise a warning at the approach threshold or a critical alert at 100%.
    ///
    /// `utilization` is in percent of the limit; below `threshold` nothing
    /// is raised.
    pub fn check_limit(
        &mut self,
        category: AlertCategory,
        label: &str,
        utilization: Decimal,
        threshold: Decimal,
    ) {
        if utilization >= Decimal::ONE_HUNDRED {
            self.raise(RiskAlert::new(
                AlertSeverity::Critical,
                category,
                format!("{label} limit breached ({utilization}% of limit)"),
            ));
        } else if utilization >= threshold {
            self.raise(RiskAlert::new(
                AlertSeverity::Warning,
                category,
                format!("{label} approaching limit ({utilization}% of limit)"),
            ));
        }
    }

    /// Newest `n` alerts.
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<RiskAlert> {
        self.alerts.tail(n)
    }

    /// Unacknowledged alert count.
    #[must_use]
    pub fn unacknowledged(&self) -> usize {
        self.alerts.iter().filter(|a| !a.acknowledged).count()
    }

    /// Acknowledge everything. Returns how many alerts changed.
    pub fn acknowledge_all(&mut self) -> usize {
        let mut changed = 0;
        for alert in self.alerts.iter_mut().filter(|a| !a.acknowledged) {
            alert.acknowledged = true;
            changed += 1;
        }
        changed
    }

    /// All alerts, oldest first.
    #[must_use]
    pub fn all(&self) -> Vec<RiskAlert> {
        self.alerts.iter().cloned().collect()
    }

    /// Replace contents (used on restore).
    pub fn replace(&mut self, alerts: Vec<RiskAlert>) {
        self.alerts.clear();
        for alert in alerts {
            self.alerts.push(alert);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_check_limit_thresholds() {
        let mut log = AlertLog::new(10);
        log.check_limit(AlertCategory::DailyLoss, "daily loss", dec!(40), dec!(75));
        assert!(log.recent(10).is_empty());

        log.check_limit(AlertCategory::DailyLoss, "daily loss", dec!(80), dec!(75));
        log.check_limit(AlertCategory::Drawdown, "drawdown", dec!(100), dec!(75));
        let alerts = log.recent(10);
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);
        assert_eq!(alerts[1].severity, AlertSeverity::Critical);
        assert_eq!(alerts[1].category, AlertCategory::Drawdown);
    }

    #[test]
    fn test_acknowledge_all() {
        let mut log = AlertLog::new(10);
        log.raise(RiskAlert::new(AlertSeverity::Info, AlertCategory::TradingMode, "x"));
        log.raise(RiskAlert::new(AlertSeverity::Info, AlertCategory::TradingMode, "y"));
        assert_eq!(log.unacknowledged(), 2);
        assert_eq!(log.acknowledge_all(), 2);
        assert_eq!(log.unacknowledged(), 0);
        assert_eq!(log.acknowledge_all(), 0);
    }

    #[test]
    fn test_log_is_capped() {
        let mut log = AlertLog::new(4);
        for i in 0..5 {
            log.raise(RiskAlert::new(
                AlertSeverity::Info,
                AlertCategory::TradingMode,
                format!("{i}"),
            ));
        }
        let alerts = log.all();
        assert!(alerts.len() <= 4);
        assert_eq!(alerts.last().map(|a| a.message.as_str()), Some("4"));
    }
}
