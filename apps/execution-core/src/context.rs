//! Application context.
//!
//! Built once at the root from [`Config`] and shared by the binary, the
//! status API and tests. Orders placed through [`TradingContext::place_order`]
//! pass the risk gate before they reach the engine.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::engine::{
    CapacityManager, EngineError, EngineState, ExecutionEngine, ExecutionListener, ExecutionResult,
    JoinSummary, Order, SimulatedVenue, VenueAdapter,
};
use crate::resilience::ResilienceHandler;
use crate::risk::{RiskManager, TradeRequest, ValidationOutcome};

/// Result of [`TradingContext::place_order`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrderOutcome {
    /// Risk decision, including the adjusted size actually submitted.
    pub validation: ValidationOutcome,
    /// Engine order id when the order was submitted.
    pub order_id: Option<String>,
}

/// Feeds fills back into the risk gate's position book.
///
/// Opposite-side fills close positions and realize pnl, so exposure and the
/// open-position count track what is actually held.
#[derive(Debug)]
pub struct RiskRecorder {
    risk: Arc<RiskManager>,
}

impl RiskRecorder {
    /// Listener recording into `risk`.
    #[must_use]
    pub const fn new(risk: Arc<RiskManager>) -> Self {
        Self { risk }
    }
}

impl ExecutionListener for RiskRecorder {
    fn on_result(&self, result: &ExecutionResult) {
        let Some(price) = result.avg_price else {
            return;
        };
        if result.is_filled() {
            self.risk.record_fill(
                &result.symbol,
                result.side,
                result.filled_amount,
                price,
                result.fee,
            );
        }
    }
}

/// Port to the fund manager holding account balances.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    /// Capital available for new positions, or `None` when unknown.
    async fn available_balance(&self) -> Option<Decimal>;
}

/// Shared handles to every component.
#[derive(Clone)]
pub struct TradingContext {
    config: Arc<Config>,
    resilience: Arc<ResilienceHandler>,
    risk: Arc<RiskManager>,
    engine: Arc<ExecutionEngine>,
    capacity: Arc<CapacityManager>,
    balance: Option<Arc<dyn BalanceSource>>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for TradingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradingContext")
            .field("engine", &self.engine)
            .field("balance_source", &self.balance.is_some())
            .finish_non_exhaustive()
    }
}

impl TradingContext {
    /// Wire components from config. Venues are not registered yet.
    #[must_use]
    pub fn from_config(config: Config, shutdown: CancellationToken) -> Self {
        let resilience_settings = config.resilience.to_settings();
        let engine_settings = config.engine.to_settings(resilience_settings.retry.clone());

        let resilience = Arc::new(ResilienceHandler::new(
            resilience_settings,
            shutdown.child_token(),
        ));
        let risk = Arc::new(RiskManager::new(
            config.risk.limits.clone(),
            config.risk.initial_capital,
            Arc::clone(&resilience),
        ));
        let capacity = Arc::new(CapacityManager::new(&config.capacity));
        let engine = Arc::new(ExecutionEngine::new(
            engine_settings,
            Arc::clone(&resilience),
            Arc::clone(&capacity),
            shutdown.child_token(),
        ));
        engine.add_listener(Arc::new(RiskRecorder::new(Arc::clone(&risk))));

        Self {
            config: Arc::new(config),
            resilience,
            risk,
            engine,
            capacity,
            balance: None,
            shutdown,
        }
    }

    /// Query `source` for the funds check whenever a request carries no
    /// balance of its own.
    #[must_use]
    pub fn with_balance_source(mut self, source: Arc<dyn BalanceSource>) -> Self {
        self.balance = Some(source);
        self
    }

    /// Loaded configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Resilience layer.
    #[must_use]
    pub const fn resilience(&self) -> &Arc<ResilienceHandler> {
        &self.resilience
    }

    /// Risk gate.
    #[must_use]
    pub const fn risk(&self) -> &Arc<RiskManager> {
        &self.risk
    }

    /// Execution engine.
    #[must_use]
    pub const fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    /// Capacity manager.
    #[must_use]
    pub const fn capacity(&self) -> &Arc<CapacityManager> {
        &self.capacity
    }

    /// Root shutdown token.
    #[must_use]
    pub const fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Register every configured venue behind `adapter`.
    pub fn register_configured_venues(
        &self,
        adapter: Arc<dyn VenueAdapter>,
    ) -> Result<usize, EngineError> {
        for venue in &self.config.engine.venues {
            self.engine.register_venue(venue.clone(), Arc::clone(&adapter))?;
        }
        Ok(self.config.engine.venues.len())
    }

    /// Register configured venues with the simulated adapter and start the
    /// engine.
    pub fn start_simulated(&self) -> Result<EngineState, EngineError> {
        self.register_configured_venues(Arc::new(SimulatedVenue::new()))?;
        self.engine.start()
    }

    /// Validate against the risk gate, then submit the adjusted size.
    ///
    /// A request without `available_balance` is checked against the balance
    /// source, when one is set. Rejections are returned as outcomes without
    /// touching the engine.
    pub async fn place_order(
        &self,
        request: &TradeRequest,
    ) -> Result<PlaceOrderOutcome, EngineError> {
        let queried;
        let request = match (&self.balance, request.available_balance) {
            (Some(source), None) => match source.available_balance().await {
                Some(balance) => {
                    queried = request.clone().with_available_balance(balance);
                    &queried
                }
                None => {
                    tracing::debug!(symbol = %request.symbol, "Balance source has no balance");
                    request
                }
            },
            _ => request,
        };

        let validation = self.risk.validate_trade(request);
        if !validation.accepted {
            return Ok(PlaceOrderOutcome {
                validation,
                order_id: None,
            });
        }

        let mut order = Order::market(&request.symbol, request.side, validation.adjusted_size)
            .with_type(request.order_type)
            .with_price(request.price);
        order.venue.clone_from(&request.venue);

        let order_id = self.engine.submit_order(order).await?;
        Ok(PlaceOrderOutcome {
            validation,
            order_id: Some(order_id),
        })
    }

    /// Drain the engine, then cancel background work.
    ///
    /// Queued orders are flushed and retried normally; backoff sleeps are
    /// only interrupted once the workers have stopped.
    pub async fn shutdown(&self) -> Result<JoinSummary, EngineError> {
        let summary = self.engine.shutdown().await;
        self.shutdown.cancel();
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{OrderSide, OrderType};
    use crate::risk::RejectionKind;
    use rust_decimal_macros::dec;

    fn context() -> TradingContext {
        let mut config = Config::default();
        config.engine.global_throttle_ns = 0;
        config.engine.initial_workers = 1;
        config.engine.adaptive.enabled = false;
        config.engine.venues[0].latency_ms = 0.0;
        config.risk.initial_capital = dec!(100000);
        TradingContext::from_config(config, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_rejected_order_never_reaches_engine() {
        let ctx = context();
        ctx.start_simulated().unwrap();
        assert!(ctx.resilience().emergency_stop("manual"));

        let request = TradeRequest::new("BTC/USD", OrderSide::Buy, OrderType::Market, dec!(0.01), dec!(50000));
        let outcome = ctx.place_order(&request).await.unwrap();

        assert!(!outcome.validation.accepted);
        assert_eq!(outcome.validation.rejection, Some(RejectionKind::EmergencyStop));
        assert!(outcome.order_id.is_none());
        assert_eq!(ctx.engine().queued_orders(), 0);
        ctx.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_filled_order_recorded_as_open_position() {
        let ctx = context();
        ctx.start_simulated().unwrap();

        let request = TradeRequest::new("BTC/USD", OrderSide::Buy, OrderType::Limit, dec!(0.01), dec!(50000));
        let outcome = ctx.place_order(&request).await.unwrap();
        assert!(outcome.validation.accepted);
        assert!(outcome.order_id.is_some());

        ctx.engine().flush().await.unwrap();
        ctx.shutdown().await.unwrap();

        let status = ctx.risk().get_risk_status();
        assert_eq!(status.open_positions, 1);
        assert!(status.total_exposure > dec!(0));
    }

    struct FixedBalance(Decimal);

    #[async_trait]
    impl BalanceSource for FixedBalance {
        async fn available_balance(&self) -> Option<Decimal> {
            Some(self.0)
        }
    }

    #[tokio::test]
    async fn test_balance_source_feeds_funds_check() {
        let ctx = context().with_balance_source(Arc::new(FixedBalance(dec!(100))));
        ctx.start_simulated().unwrap();

        let request = TradeRequest::new("BTC/USD", OrderSide::Buy, OrderType::Limit, dec!(0.01), dec!(50000));
        let outcome = ctx.place_order(&request).await.unwrap();
        assert_eq!(outcome.validation.rejection, Some(RejectionKind::InsufficientFunds));
        assert!(outcome.order_id.is_none());

        // A balance on the request wins over the source.
        let funded = request.with_available_balance(dec!(10000));
        let outcome = ctx.place_order(&funded).await.unwrap();
        assert!(outcome.validation.accepted);
        ctx.shutdown().await.unwrap();
    }
}
