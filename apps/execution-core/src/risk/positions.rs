//! Net position per symbol, built from fills.
//!
//! A fill on the same side as the open position (or on a flat symbol) adds
//! to it at a volume-weighted entry price. A fill on the opposite side
//! reduces it and realizes pnl against that entry price; any excess opens a
//! new position on the fill's side.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::engine::OrderSide;

/// Open position in one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetPosition {
    /// Long for buys, short for sells.
    pub side: OrderSide,
    /// Open quantity, always positive.
    pub amount: Decimal,
    /// Volume-weighted entry price.
    pub avg_price: Decimal,
}

impl NetPosition {
    /// Notional at entry price.
    #[must_use]
    pub fn notional(&self) -> Decimal {
        self.amount * self.avg_price
    }
}

/// The part of a fill that reduced an existing position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reduction {
    /// Quantity taken off the position.
    pub amount: Decimal,
    /// Entry notional of that quantity.
    pub notional: Decimal,
    /// Realized pnl before fees.
    pub pnl: Decimal,
    /// Whether the position went flat (or flipped).
    pub closed: bool,
}

/// What one fill did to the book.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillEffect {
    /// Reduction of an opposite-side position, if any.
    pub reduction: Option<Reduction>,
    /// Notional added on the fill's side.
    pub added_notional: Decimal,
    /// Whether a new position was opened.
    pub opened: bool,
}

/// Net positions keyed by symbol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionBook {
    positions: BTreeMap<String, NetPosition>,
}

impl PositionBook {
    /// Open position in `symbol`.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<&NetPosition> {
        self.positions.get(symbol)
    }

    /// Number of open positions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Whether every symbol is flat.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Iterate open positions by symbol.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &NetPosition)> {
        self.positions.iter()
    }

    /// Whether an order on `side` would reduce an open position in `symbol`.
    #[must_use]
    pub fn reduces(&self, symbol: &str, side: OrderSide) -> bool {
        self.positions.get(symbol).is_some_and(|p| p.side != side)
    }

    /// Apply a fill of `amount` at `price`.
    pub fn apply(
        &mut self,
        symbol: &str,
        side: OrderSide,
        amount: Decimal,
        price: Decimal,
    ) -> FillEffect {
        let mut effect = FillEffect::default();
        if amount <= Decimal::ZERO {
            return effect;
        }

        let mut remaining = amount;
        if let Some(position) = self.positions.get_mut(symbol) {
            if position.side == side {
                let total = position.amount + amount;
                position.avg_price = ((position.notional() + amount * price) / total).round_dp(8);
                position.amount = total;
                effect.added_notional = amount * price;
                return effect;
            }

            let reduced = remaining.min(position.amount);
            let direction = Decimal::from(position.side.sign());
            let reduction = Reduction {
                amount: reduced,
                notional: reduced * position.avg_price,
                pnl: (price - position.avg_price) * reduced * direction,
                closed: reduced == position.amount,
            };
            position.amount -= reduced;
            remaining -= reduced;
            if reduction.closed {
                self.positions.remove(symbol);
            }
            effect.reduction = Some(reduction);
        }

        if remaining > Decimal::ZERO {
            self.positions.insert(
                symbol.to_string(),
                NetPosition {
                    side,
                    amount: remaining,
                    avg_price: price,
                },
            );
            effect.added_notional = remaining * price;
            effect.opened = true;
        }
        effect
    }
}
