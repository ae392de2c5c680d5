//! Execution Flow Integration Tests
//!
//! Full path from a trade request through the risk gate, the engine's
//! batches and workers, a venue adapter and back into risk state:
//! - Accepted trades fill and open positions
//! - Transient venue failures are retried and recorded
//! - Rejected trades never reach the venue
//! - Opposite-side fills close positions and realize pnl

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use execution_core::config::Config;
use execution_core::context::TradingContext;
use execution_core::engine::{
    EngineState, ExecutionListener, ExecutionResult, Fill, Order, OrderSide, OrderStatus,
    OrderType, VenueAdapter, VenueConfig,
};
use execution_core::resilience::{ErrorType, ResilienceError};
use execution_core::risk::{RejectionKind, TradeRequest};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;

/// Venue failing the first `failures` calls with a network error.
struct FlakyVenue {
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyVenue {
    fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl VenueAdapter for FlakyVenue {
    async fn execute(&self, order: &Order, config: &VenueConfig) -> Result<Fill, ResilienceError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(ResilienceError::classified(
                ErrorType::Network,
                format!("{}: connection reset", config.name),
            ));
        }
        Ok(Fill {
            venue_order_id: format!("{}-{n}", config.name),
            filled_amount: order.amount,
            avg_price: order.price,
            fee: dec!(0.5),
            slippage_bps: 1.5,
        })
    }
}

#[derive(Default)]
struct Collector {
    results: Mutex<Vec<ExecutionResult>>,
}

impl ExecutionListener for Collector {
    fn on_result(&self, result: &ExecutionResult) {
        self.results.lock().push(result.clone());
    }
}

fn context() -> TradingContext {
    let mut config = Config::default();
    config.engine.batch_size = 2;
    config.engine.initial_workers = 1;
    config.engine.global_throttle_ns = 0;
    config.engine.adaptive.enabled = false;
    config.resilience.retry.delays_ms = vec![0, 0, 0];
    config.risk.initial_capital = dec!(100000);
    TradingContext::from_config(config, CancellationToken::new())
}

fn request(size: Decimal) -> TradeRequest {
    TradeRequest::new("ETH/USD", OrderSide::Buy, OrderType::Limit, size, dec!(2000))
}

async fn wait_for_open_positions(ctx: &TradingContext, expected: u32) {
    for _ in 0..200 {
        if ctx.risk().get_risk_status().open_positions == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("open positions never reached {expected}");
}

#[tokio::test]
async fn test_accepted_trades_fill_and_open_positions() {
    let ctx = context();
    let venue = Arc::new(FlakyVenue::new(0));
    let collector = Arc::new(Collector::default());
    ctx.engine().add_listener(Arc::clone(&collector) as Arc<dyn ExecutionListener>);
    assert_eq!(ctx.register_configured_venues(Arc::clone(&venue) as Arc<dyn VenueAdapter>), Ok(1));
    assert_eq!(ctx.engine().start(), Ok(EngineState::Running));

    for _ in 0..2 {
        let outcome = ctx.place_order(&request(dec!(1))).await.unwrap();
        assert!(outcome.validation.accepted);
        assert!(outcome.order_id.is_some());
    }

    let summary = ctx.shutdown().await.unwrap();
    assert_eq!(summary.panicked, 0);

    let results = collector.results.lock();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.status == OrderStatus::Filled));
    assert!(results.iter().all(|r| r.venue == "primary"));
    drop(results);

    let status = ctx.risk().get_risk_status();
    assert_eq!(status.open_positions, 2);
    assert_eq!(status.total_exposure, dec!(4000));
    assert_eq!(status.total_fees, dec!(1.0));
    assert_eq!(venue.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_transient_venue_failure_is_retried() {
    let ctx = context();
    let venue = Arc::new(FlakyVenue::new(1));
    ctx.register_configured_venues(Arc::clone(&venue) as Arc<dyn VenueAdapter>)
        .unwrap();
    ctx.engine().start().unwrap();

    ctx.place_order(&request(dec!(1))).await.unwrap();
    ctx.shutdown().await.unwrap();

    assert_eq!(venue.calls.load(Ordering::SeqCst), 2);
    let stats = ctx.resilience().get_error_stats();
    assert_eq!(stats.total_errors, 1);
    assert_eq!(stats.recoveries, 1);
    assert_eq!(stats.unresolved, 0);

    let summary = ctx.engine().sink().summary();
    assert_eq!(summary.total_orders, 1);
    assert_eq!(summary.successful, 1);
}

#[tokio::test]
async fn test_rejected_trade_never_reaches_venue() {
    let ctx = context();
    let venue = Arc::new(FlakyVenue::new(0));
    ctx.register_configured_venues(Arc::clone(&venue) as Arc<dyn VenueAdapter>)
        .unwrap();
    ctx.engine().start().unwrap();

    // 200 ETH at 2000 is 4x leverage on 100k capital.
    let outcome = ctx.place_order(&request(dec!(200))).await.unwrap();
    assert!(!outcome.validation.accepted);
    assert_eq!(outcome.validation.rejection, Some(RejectionKind::Leverage));
    assert!(outcome.order_id.is_none());

    ctx.shutdown().await.unwrap();
    assert_eq!(venue.calls.load(Ordering::SeqCst), 0);
    assert_eq!(ctx.risk().get_risk_status().open_positions, 0);
}

#[tokio::test]
async fn test_round_trips_close_positions() {
    let mut config = Config::default();
    config.engine.batch_size = 2;
    config.engine.initial_workers = 1;
    config.engine.global_throttle_ns = 0;
    config.engine.adaptive.enabled = false;
    config.risk.initial_capital = dec!(100000);
    config.risk.limits.max_open_positions = 1;
    let ctx = TradingContext::from_config(config, CancellationToken::new());
    let venue = Arc::new(FlakyVenue::new(0));
    ctx.register_configured_venues(Arc::clone(&venue) as Arc<dyn VenueAdapter>)
        .unwrap();
    ctx.engine().start().unwrap();

    for round in 0..3 {
        let buy = ctx.place_order(&request(dec!(1))).await.unwrap();
        assert!(buy.validation.accepted, "round {round}: {}", buy.validation.reason);
        ctx.engine().flush().await.unwrap();
        wait_for_open_positions(&ctx, 1).await;

        // A new symbol is still capped while the position is held.
        let other = TradeRequest::new("BTC/USD", OrderSide::Buy, OrderType::Limit, dec!(0.1), dec!(50000));
        let blocked = ctx.place_order(&other).await.unwrap();
        assert_eq!(blocked.validation.rejection, Some(RejectionKind::MaxPositions));

        let exit = TradeRequest::new("ETH/USD", OrderSide::Sell, OrderType::Limit, dec!(1), dec!(2100));
        let sell = ctx.place_order(&exit).await.unwrap();
        assert!(sell.validation.accepted, "round {round}: {}", sell.validation.reason);
        ctx.engine().flush().await.unwrap();
        wait_for_open_positions(&ctx, 0).await;
    }

    ctx.shutdown().await.unwrap();

    let status = ctx.risk().get_risk_status();
    assert_eq!(status.open_positions, 0);
    assert_eq!(status.total_exposure, Decimal::ZERO);
    assert_eq!(status.total_fees, dec!(3.0));
    // Three 100 gains less six 0.5 fees.
    assert_eq!(status.current_capital, dec!(100297));
    assert!(ctx.risk().positions().is_empty());
    assert_eq!(venue.calls.load(Ordering::SeqCst), 6);
}
