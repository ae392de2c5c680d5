//! Execution results, per-attempt metrics and the capped metrics sink.

use std::collections::{BTreeMap, VecDeque};
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::order::{OrderSide, OrderStatus};

/// One measurement per order attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetric {
    /// Order identifier.
    pub order_id: String,
    /// Venue the order was routed to.
    pub venue: String,
    /// Whether the venue filled the order.
    pub success: bool,
    /// Wall-clock time of the venue call, including retries.
    pub latency_us: f64,
    /// Slippage in basis points.
    pub slippage_bps: f64,
    /// When the attempt finished.
    pub timestamp: DateTime<Utc>,
    /// Error message on failure.
    pub error: Option<String>,
    /// Batch the order travelled in.
    pub batch_id: String,
    /// Worker that executed it.
    pub worker_id: usize,
}

/// Outcome of one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Order identifier.
    pub order_id: String,
    /// Instrument symbol.
    pub symbol: String,
    /// Side.
    pub side: OrderSide,
    /// Venue.
    pub venue: String,
    /// Final status.
    pub status: OrderStatus,
    /// Quantity requested.
    pub requested_amount: Decimal,
    /// Quantity filled.
    pub filled_amount: Decimal,
    /// Average fill price.
    pub avg_price: Option<Decimal>,
    /// Fees charged.
    pub fee: Decimal,
    /// Venue identifier for the fill.
    pub venue_order_id: Option<String>,
    /// Error message on failure.
    pub error: Option<String>,
    /// Machine-readable error code on failure.
    pub error_code: Option<String>,
}

impl ExecutionResult {
    /// Whether the order was filled (fully or partially).
    #[must_use]
    pub fn is_filled(&self) -> bool {
        self.filled_amount > Decimal::ZERO
    }
}

/// What a worker sends to the result loop for each order.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// The outcome.
    pub result: ExecutionResult,
    /// The measurement.
    pub metric: ExecutionMetric,
}

/// Per-venue aggregates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VenueSummary {
    /// Attempts.
    pub orders: usize,
    /// Successes.
    pub successful: usize,
    /// Mean latency.
    pub avg_latency_us: f64,
    /// Mean slippage.
    pub avg_slippage_bps: f64,
}

/// Aggregates over a set of metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    /// Attempts.
    pub total_orders: usize,
    /// Successes.
    pub successful: usize,
    /// Failures.
    pub failed: usize,
    /// `successful / total_orders` (1.0 when empty).
    pub success_rate: f64,
    /// Mean latency.
    pub avg_latency_us: f64,
    /// Median latency.
    pub p50_latency_us: f64,
    /// 99th percentile latency.
    pub p99_latency_us: f64,
    /// Mean slippage over successes.
    pub avg_slippage_bps: f64,
    /// Orders per second over the covered span.
    pub throughput_per_sec: f64,
    /// Per-venue breakdown.
    pub per_venue: BTreeMap<String, VenueSummary>,
}

/// Nearest-rank percentile of an ascending slice.
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

impl MetricsSummary {
    /// Summarise `metrics` observed over `span_secs`.
    #[must_use]
    pub fn from_metrics<'a>(metrics: impl IntoIterator<Item = &'a ExecutionMetric>, span_secs: f64) -> Self {
        let mut summary = Self::default();
        let mut latencies = Vec::new();
        let mut slippage_total = 0.0;

        for metric in metrics {
            summary.total_orders += 1;
            latencies.push(metric.latency_us);
            let venue = summary.per_venue.entry(metric.venue.clone()).or_default();
            venue.orders += 1;
            venue.avg_latency_us += metric.latency_us;
            if metric.success {
                summary.successful += 1;
                slippage_total += metric.slippage_bps;
                venue.successful += 1;
                venue.avg_slippage_bps += metric.slippage_bps;
            }
        }

        summary.failed = summary.total_orders - summary.successful;
        if summary.total_orders == 0 {
            summary.success_rate = 1.0;
            return summary;
        }

        summary.success_rate = summary.successful as f64 / summary.total_orders as f64;
        summary.avg_latency_us = latencies.iter().sum::<f64>() / latencies.len() as f64;
        latencies.sort_by(f64::total_cmp);
        summary.p50_latency_us = percentile(&latencies, 50.0);
        summary.p99_latency_us = percentile(&latencies, 99.0);
        if summary.successful > 0 {
            summary.avg_slippage_bps = slippage_total / summary.successful as f64;
        }
        if span_secs > 0.0 {
            summary.throughput_per_sec = summary.total_orders as f64 / span_secs;
        }
        for venue in summary.per_venue.values_mut() {
            venue.avg_latency_us /= venue.orders as f64;
            if venue.successful > 0 {
                venue.avg_slippage_bps /= venue.successful as f64;
            }
        }
        summary
    }
}

#[derive(Debug)]
struct SinkInner {
    metrics: VecDeque<ExecutionMetric>,
    total_recorded: u64,
    total_successful: u64,
}

/// Append-only, size-capped metric store.
///
/// Lifetime totals survive eviction; summaries cover what is retained.
#[derive(Debug)]
pub struct MetricsSink {
    capacity: usize,
    started: Instant,
    inner: Mutex<SinkInner>,
}

impl MetricsSink {
    /// Sink keeping the newest `capacity` metrics.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            started: Instant::now(),
            inner: Mutex::new(SinkInner {
                metrics: VecDeque::new(),
                total_recorded: 0,
                total_successful: 0,
            }),
        }
    }

    /// Append a metric, evicting the oldest when full.
    pub fn record(&self, metric: ExecutionMetric) {
        let mut inner = self.inner.lock();
        inner.total_recorded += 1;
        if metric.success {
            inner.total_successful += 1;
        }
        if inner.metrics.len() == self.capacity {
            inner.metrics.pop_front();
        }
        inner.metrics.push_back(metric);
    }

    /// Retained metric count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().metrics.len()
    }

    /// Whether nothing is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lifetime (recorded, successful) counts.
    #[must_use]
    pub fn totals(&self) -> (u64, u64) {
        let inner = self.inner.lock();
        (inner.total_recorded, inner.total_successful)
    }

    /// Summary of everything retained; throughput over the sink's lifetime.
    #[must_use]
    pub fn summary(&self) -> MetricsSummary {
        let span = self.started.elapsed().as_secs_f64();
        let inner = self.inner.lock();
        MetricsSummary::from_metrics(inner.metrics.iter(), span)
    }

    /// Summary of metrics recorded after `since`; throughput over that span.
    #[must_use]
    pub fn summary_since(&self, since: DateTime<Utc>) -> MetricsSummary {
        let span = (Utc::now() - since).num_microseconds().unwrap_or(0) as f64 / 1_000_000.0;
        let inner = self.inner.lock();
        MetricsSummary::from_metrics(inner.metrics.iter().filter(|m| m.timestamp > since), span)
    }

    /// Newest `n` metrics, oldest first.
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<ExecutionMetric> {
        let inner = self.inner.lock();
        let skip = inner.metrics.len().saturating_sub(n);
        inner.metrics.iter().skip(skip).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(venue: &str, success: bool, latency_us: f64) -> ExecutionMetric {
        ExecutionMetric {
            order_id: "o".into(),
            venue: venue.into(),
            success,
            latency_us,
            slippage_bps: if success { 2.0 } else { 0.0 },
            timestamp: Utc::now(),
            error: (!success).then(|| "boom".to_string()),
            batch_id: "b".into(),
            worker_id: 0,
        }
    }

    #[test]
    fn test_percentiles() {
        let values: Vec<f64> = (1..=100).map(f64::from).collect();
        assert_eq!(percentile(&values, 50.0), 50.0);
        assert_eq!(percentile(&values, 99.0), 99.0);
        assert_eq!(percentile(&[7.0], 99.0), 7.0);
        assert_eq!(percentile(&[], 99.0), 0.0);
    }

    #[test]
    fn test_summary_rates_and_venues() {
        let metrics = vec![
            metric("alpha", true, 100.0),
            metric("alpha", true, 300.0),
            metric("beta", false, 50.0),
            metric("beta", true, 150.0),
        ];
        let summary = MetricsSummary::from_metrics(&metrics, 2.0);

        assert_eq!(summary.total_orders, 4);
        assert_eq!(summary.failed, 1);
        assert!((summary.success_rate - 0.75).abs() < 1e-9);
        assert!((summary.avg_latency_us - 150.0).abs() < 1e-9);
        assert!((summary.throughput_per_sec - 2.0).abs() < 1e-9);
        assert!((summary.avg_slippage_bps - 2.0).abs() < 1e-9);
        assert_eq!(summary.per_venue["alpha"].successful, 2);
        assert!((summary.per_venue["alpha"].avg_latency_us - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_summary_is_healthy() {
        let summary = MetricsSummary::from_metrics(&[], 1.0);
        assert_eq!(summary.total_orders, 0);
        assert_eq!(summary.success_rate, 1.0);
    }

    #[test]
    fn test_sink_is_capped_but_totals_persist() {
        let sink = MetricsSink::new(3);
        for i in 0..5 {
            sink.record(metric("alpha", i % 2 == 0, 10.0));
        }
        assert_eq!(sink.len(), 3);
        assert_eq!(sink.totals(), (5, 3));
        assert_eq!(sink.recent(10).len(), 3);
    }
}
