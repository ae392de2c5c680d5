//! Worker task: executes batches sequentially against their venues.
//!
//! A worker owns its batch receiver. Each batch is split by venue (keeping
//! submission order inside each venue group) and every order is executed
//! independently: one failure never aborts its siblings, and the worker
//! itself never retries. Venue calls go through the resilience layer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::observability::metrics;
use crate::resilience::{ResilienceError, ResilienceHandler, RetryPolicy};

use super::error::EngineError;
use super::metrics::{ExecutionMetric, ExecutionReport, ExecutionResult};
use super::order::{Order, OrderBatch, OrderStatus};
use super::settings::VenueThrottleSettings;
use super::venue::{Venue, VenueRegistry};

/// Everything a worker needs, cloned into each worker task.
#[derive(Debug, Clone)]
pub(crate) struct WorkerContext {
    pub(crate) venues: Arc<VenueRegistry>,
    pub(crate) resilience: Arc<ResilienceHandler>,
    pub(crate) retry: RetryPolicy,
    pub(crate) throttle: VenueThrottleSettings,
    pub(crate) results: mpsc::Sender<ExecutionReport>,
    /// Cancels per-order spacing; orders still drain, unpaced.
    pub(crate) cancel: CancellationToken,
}

/// Worker loop. Ends when the batch channel closes, after draining it.
pub(crate) async fn run_worker(
    worker_id: usize,
    ctx: WorkerContext,
    mut batches: mpsc::Receiver<OrderBatch>,
) {
    tracing::debug!(worker_id, "Worker started");
    let mut processed = 0usize;
    while let Some(batch) = batches.recv().await {
        processed += batch.len();
        process_batch(worker_id, &ctx, batch).await;
    }
    tracing::debug!(worker_id, processed, "Worker stopped");
}

async fn process_batch(worker_id: usize, ctx: &WorkerContext, batch: OrderBatch) {
    let batch_id = batch.id.clone();
    let default_venue = ctx.venues.default_venue().unwrap_or_default();
    tracing::trace!(worker_id, batch_id = %batch_id, orders = batch.len(), "Processing batch");

    for (venue_name, orders) in batch.partition_by_venue(&default_venue) {
        let Some(venue) = ctx.venues.get(&venue_name) else {
            let error = if venue_name.is_empty() {
                EngineError::NoVenues
            } else {
                EngineError::UnknownVenue { venue: venue_name.clone() }
            };
            for order in orders {
                let report = reject(worker_id, &batch_id, &venue_name, order, &error);
                send(ctx, report).await;
            }
            continue;
        };

        let started = Instant::now();
        for (i, order) in orders.into_iter().enumerate() {
            if i > 0 {
                pace(ctx, venue.throttle_ns()).await;
            }
            let report = execute_order(worker_id, &batch_id, ctx, &venue, order).await;
            send(ctx, report).await;
        }

        if let Some(change) = venue.adjust_throttle(started.elapsed(), &ctx.throttle) {
            tracing::debug!(
                venue = %venue.name(),
                from_ns = change.from_ns,
                to_ns = change.to_ns,
                "Venue throttle adjusted"
            );
            metrics::set_venue_throttle(venue.name(), change.to_ns);
        }
    }
}

async fn pace(ctx: &WorkerContext, spacing_ns: u64) {
    if spacing_ns == 0 || ctx.cancel.is_cancelled() {
        return;
    }
    tokio::select! {
        () = ctx.cancel.cancelled() => {}
        () = tokio::time::sleep(Duration::from_nanos(spacing_ns)) => {}
    }
}

async fn send(ctx: &WorkerContext, report: ExecutionReport) {
    if ctx.results.send(report).await.is_err() {
        tracing::warn!("Result channel closed, dropping execution report");
    }
}

async fn execute_order(
    worker_id: usize,
    batch_id: &str,
    ctx: &WorkerContext,
    venue: &Venue,
    mut order: Order,
) -> ExecutionReport {
    let operation = format!("venue:{}", venue.name());
    order.status = OrderStatus::Open;

    let started = Instant::now();
    let order_ref = &order;
    let outcome = ctx
        .resilience
        .guarded(&operation, &ctx.retry, move || venue.execute(order_ref))
        .await;
    let latency_us = started.elapsed().as_secs_f64() * 1_000_000.0;

    let (result, success, slippage_bps, error) = match outcome {
        Ok(fill) => {
            let status = if fill.filled_amount >= order.amount {
                OrderStatus::Filled
            } else {
                OrderStatus::Open
            };
            let result = ExecutionResult {
                order_id: order.id.clone(),
                symbol: order.symbol.clone(),
                side: order.side,
                venue: venue.name().to_string(),
                status,
                requested_amount: order.amount,
                filled_amount: fill.filled_amount,
                avg_price: fill.avg_price,
                fee: fill.fee,
                venue_order_id: Some(fill.venue_order_id),
                error: None,
                error_code: None,
            };
            (result, true, fill.slippage_bps, None)
        }
        Err(err) => {
            tracing::warn!(
                worker_id,
                order_id = %order.id,
                venue = %venue.name(),
                error = %err,
                "Order execution failed"
            );
            let status = if matches!(err, ResilienceError::Cancelled { .. }) {
                OrderStatus::Canceled
            } else {
                OrderStatus::Rejected
            };
            let message = err.to_string();
            let result = failed_result(&order, venue.name(), status, &message, error_code(&err));
            (result, false, 0.0, Some(message))
        }
    };

    ExecutionReport {
        metric: ExecutionMetric {
            order_id: order.id,
            venue: venue.name().to_string(),
            success,
            latency_us,
            slippage_bps,
            timestamp: Utc::now(),
            error,
            batch_id: batch_id.to_string(),
            worker_id,
        },
        result,
    }
}

fn reject(
    worker_id: usize,
    batch_id: &str,
    venue: &str,
    order: Order,
    error: &EngineError,
) -> ExecutionReport {
    let message = error.to_string();
    ExecutionReport {
        result: failed_result(&order, venue, OrderStatus::Rejected, &message, error.code()),
        metric: ExecutionMetric {
            order_id: order.id,
            venue: venue.to_string(),
            success: false,
            latency_us: 0.0,
            slippage_bps: 0.0,
            timestamp: Utc::now(),
            error: Some(message),
            batch_id: batch_id.to_string(),
            worker_id,
        },
    }
}

fn failed_result(
    order: &Order,
    venue: &str,
    status: OrderStatus,
    message: &str,
    code: &str,
) -> ExecutionResult {
    ExecutionResult {
        order_id: order.id.clone(),
        symbol: order.symbol.clone(),
        side: order.side,
        venue: venue.to_string(),
        status,
        requested_amount: order.amount,
        filled_amount: Decimal::ZERO,
        avg_price: None,
        fee: Decimal::ZERO,
        venue_order_id: None,
        error: Some(message.to_string()),
        error_code: Some(code.to_string()),
    }
}

fn error_code(err: &ResilienceError) -> &'static str {
    match err {
        ResilienceError::CircuitOpen { .. } => "circuit_open",
        ResilienceError::EmergencyStop { .. } => "emergency_stop",
        ResilienceError::Cancelled { .. } => "cancelled",
        other => other.error_type().as_str(),
    }
}
