//! Risk gate configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::risk::RiskLimits;

/// Risk gate configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Capital the risk state starts from when no snapshot is restored.
    pub initial_capital: Decimal,
    /// Limits enforced by the gate.
    pub limits: RiskLimits,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            initial_capital: Decimal::from(10_000),
            limits: RiskLimits::default(),
        }
    }
}
