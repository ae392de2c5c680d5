//! Orders and order batches.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::EngineError;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    /// Buy.
    Buy,
    /// Sell.
    Sell,
}

impl OrderSide {
    /// Sign applied to price moves: +1 for buys, -1 for sells.
    #[must_use]
    pub const fn sign(self) -> i64 {
        match self {
            Self::Buy => 1,
            Self::Sell => -1,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    /// Execute at the best available price.
    Market,
    /// Execute at the limit price or better.
    Limit,
    /// Market order once the stop price trades.
    StopLoss,
    /// Limit order once the stop price trades.
    StopLossLimit,
    /// Market order once the profit target trades.
    TakeProfit,
    /// Limit order once the profit target trades.
    TakeProfitLimit,
}

impl OrderType {
    /// Whether the order needs a price to be well formed.
    #[must_use]
    pub const fn requires_price(self) -> bool {
        !matches!(self, Self::Market)
    }
}

/// Order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Created, not yet dispatched.
    Pending,
    /// Dispatched to a venue.
    Open,
    /// Completely filled.
    Filled,
    /// Canceled.
    Canceled,
    /// Rejected by the engine or the venue.
    Rejected,
    /// Expired without fill.
    Expired,
}

impl OrderStatus {
    /// Terminal statuses end the engine's ownership of the order.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Canceled | Self::Rejected | Self::Expired
        )
    }
}

/// A single order, validated once at the engine boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Engine-assigned identifier.
    pub id: String,
    /// Instrument symbol.
    pub symbol: String,
    /// Side.
    pub side: OrderSide,
    /// Type.
    pub order_type: OrderType,
    /// Quantity in instrument units.
    pub amount: Decimal,
    /// Limit or trigger price. Market orders may carry a reference price.
    pub price: Option<Decimal>,
    /// Target venue; `None` routes to the default venue.
    pub venue: Option<String>,
    /// Lifecycle status.
    pub status: OrderStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Market order with a fresh identifier.
    #[must_use]
    pub fn market(symbol: impl Into<String>, side: OrderSide, amount: Decimal) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            amount,
            price: None,
            venue: None,
            status: OrderStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// Limit order with a fresh identifier.
    #[must_use]
    pub fn limit(
        symbol: impl Into<String>,
        side: OrderSide,
        amount: Decimal,
        price: Decimal,
    ) -> Self {
        Self {
            order_type: OrderType::Limit,
            price: Some(price),
            ..Self::market(symbol, side, amount)
        }
    }

    /// Route to a specific venue.
    #[must_use]
    pub fn with_venue(mut self, venue: impl Into<String>) -> Self {
        self.venue = Some(venue.into());
        self
    }

    /// Override the order type.
    #[must_use]
    pub const fn with_type(mut self, order_type: OrderType) -> Self {
        self.order_type = order_type;
        self
    }

    /// Set the price.
    #[must_use]
    pub const fn with_price(mut self, price: Decimal) -> Self {
        self.price = Some(price);
        self
    }

    /// Order notional at its own price, if it has one.
    #[must_use]
    pub fn notional(&self) -> Option<Decimal> {
        self.price.map(|p| p * self.amount)
    }

    /// Boundary validation.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidOrder`] for an empty symbol, a
    /// non-positive amount, a non-positive price, or a missing price on
    /// a priced order type.
    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |reason: &str| {
            Err(EngineError::InvalidOrder {
                reason: format!("{} ({})", reason, self.id),
            })
        };

        if self.symbol.trim().is_empty() {
            return invalid("symbol is empty");
        }
        if self.amount <= Decimal::ZERO {
            return invalid("amount must be positive");
        }
        match self.price {
            Some(price) if price <= Decimal::ZERO => invalid("price must be positive"),
            None if self.order_type.requires_price() => invalid("price required for this order type"),
            _ => Ok(()),
        }
    }
}

/// A bounded, ordered group of orders dispatched as one unit to one worker.
#[derive(Debug, Clone)]
pub struct OrderBatch {
    /// Batch identifier.
    pub id: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    capacity: usize,
    orders: Vec<Order>,
}

impl OrderBatch {
    /// Empty batch holding at most `capacity` orders (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            capacity,
            orders: Vec::with_capacity(capacity),
        }
    }

    /// Append an order. A full batch hands the order back.
    ///
    /// # Errors
    ///
    /// Returns the order unchanged when the batch is at capacity.
    pub fn push(&mut self, order: Order) -> Result<(), Order> {
        if self.is_full() {
            return Err(order);
        }
        self.orders.push(order);
        Ok(())
    }

    /// Whether the batch is at capacity.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.orders.len() >= self.capacity
    }

    /// Number of orders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    /// Whether the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Orders in submission order.
    #[must_use]
    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    /// Group orders by venue, keeping first-seen venue order and submission
    /// order within each group. Orders without a venue go to `default_venue`.
    #[must_use]
    pub fn partition_by_venue(self, default_venue: &str) -> Vec<(String, Vec<Order>)> {
        let mut groups: Vec<(String, Vec<Order>)> = Vec::new();
        for order in self.orders {
            let venue = order.venue.as_deref().unwrap_or(default_venue);
            match groups.iter_mut().find(|(name, _)| name == venue) {
                Some((_, orders)) => orders.push(order),
                None => groups.push((venue.to_string(), vec![order])),
            }
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_validate_rejects_bad_orders() {
        assert!(Order::market("BTC/USD", OrderSide::Buy, dec!(1)).validate().is_ok());
        assert!(
            Order::market("BTC/USD", OrderSide::Buy, dec!(0))
                .validate()
                .is_err()
        );
        assert!(
            Order::market("", OrderSide::Buy, dec!(1))
                .validate()
                .is_err()
        );
        assert!(
            Order::market("BTC/USD", OrderSide::Buy, dec!(1))
                .with_type(OrderType::Limit)
                .validate()
                .is_err()
        );
        assert!(
            Order::limit("BTC/USD", OrderSide::Sell, dec!(1), dec!(-5))
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_batch_never_exceeds_capacity() {
        let mut batch = OrderBatch::new(2);
        assert!(batch.push(Order::market("A", OrderSide::Buy, dec!(1))).is_ok());
        assert!(batch.push(Order::market("B", OrderSide::Buy, dec!(1))).is_ok());
        let rejected = batch.push(Order::market("C", OrderSide::Buy, dec!(1)));
        assert_eq!(rejected.map_err(|o| o.symbol), Err("C".to_string()));
        assert_eq!(batch.len(), 2);
        assert!(batch.is_full());
    }

    #[test]
    fn test_partition_keeps_submission_order() {
        let mut batch = OrderBatch::new(10);
        for (symbol, venue) in [("A", Some("x")), ("B", None), ("C", Some("x")), ("D", Some("y"))] {
            let mut order = Order::market(symbol, OrderSide::Buy, dec!(1));
            order.venue = venue.map(String::from);
            batch.push(order).unwrap();
        }

        let groups = batch.partition_by_venue("x");
        let names: Vec<(&str, Vec<&str>)> = groups
            .iter()
            .map(|(v, orders)| (v.as_str(), orders.iter().map(|o| o.symbol.as_str()).collect()))
            .collect();
        assert_eq!(names, vec![("x", vec!["A", "B", "C"]), ("y", vec!["D"])]);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(!OrderStatus::Open.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
    }
}
