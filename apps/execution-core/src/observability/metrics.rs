//! Prometheus metrics for the execution core.
//!
//! Every function records through the `metrics` facade and is a no-op until
//! [`init_metrics`] installs a recorder, so library code and tests can call
//! them freely.
//!
//! # Example
//!
//! ```ignore
//! use execution_core::observability::{init_metrics, MetricsConfig};
//!
//! init_metrics(&MetricsConfig::default())?;
//! metrics::record_order_execution("binance", true, 0.0004, 1.5);
//! ```

use std::net::{Ipv4Addr, SocketAddr};

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use serde::{Deserialize, Serialize};

/// Configuration for the metrics exporter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Install the exporter at all.
    pub enabled: bool,
    /// Address to bind the metrics HTTP listener.
    pub listen_addr: SocketAddr,
    /// Histogram buckets for latency measurements (in seconds).
    pub latency_buckets: Vec<f64>,
    /// Histogram buckets for slippage (in basis points).
    pub slippage_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 9090)),
            // 10us to 1s
            latency_buckets: vec![
                0.000_01, 0.000_1, 0.000_5, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
            ],
            slippage_buckets: vec![0.5, 1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0],
        }
    }
}

impl MetricsConfig {
    /// Create a new metrics configuration with custom address.
    #[must_use]
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            listen_addr: addr,
            ..Default::default()
        }
    }
}

/// Initialize the Prometheus metrics exporter.
///
/// This starts an HTTP server that exposes metrics at `/metrics`. Does
/// nothing when the config is disabled.
///
/// # Errors
///
/// Returns an error if the metrics exporter fails to start (e.g., port already in use).
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        tracing::info!("Prometheus metrics exporter disabled");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(config.listen_addr)
        .set_buckets(&config.latency_buckets)
        .map_err(|e| MetricsError::Configuration(e.to_string()))?
        .set_buckets_for_metric(
            Matcher::Full("order_slippage_bps".to_string()),
            &config.slippage_buckets,
        )
        .map_err(|e| MetricsError::Configuration(e.to_string()))?
        .install()
        .map_err(|e| MetricsError::Installation(e.to_string()))?;

    tracing::info!(
        addr = %config.listen_addr,
        "Prometheus metrics exporter started"
    );

    Ok(())
}

/// Error type for metrics operations.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Failed to configure metrics exporter.
    #[error("metrics configuration error: {0}")]
    Configuration(String),
    /// Failed to install metrics exporter.
    #[error("metrics installation error: {0}")]
    Installation(String),
}

// ============================================================================
// Execution Engine Metrics
// ============================================================================

/// Record one executed order.
///
/// # Arguments
///
/// * `venue` - Venue name
/// * `success` - Whether the venue filled the order
/// * `latency_seconds` - Venue call time including retries
/// * `slippage_bps` - Realized slippage in basis points
pub fn record_order_execution(venue: &str, success: bool, latency_seconds: f64, slippage_bps: f64) {
    let outcome = if success { "filled" } else { "failed" };
    counter!(
        "order_executions_total",
        "venue" => venue.to_string(),
        "outcome" => outcome
    )
    .increment(1);

    histogram!("order_latency_seconds", "venue" => venue.to_string()).record(latency_seconds);

    if success {
        histogram!("order_slippage_bps", "venue" => venue.to_string()).record(slippage_bps);
    }
}

/// Record a submission answered with a synthetic id (no capacity slot).
pub fn record_ghost_submission() {
    counter!("order_ghost_submissions_total").increment(1);
}

/// Update the live worker gauge.
pub fn set_worker_count(count: usize) {
    gauge!("engine_workers").set(count as f64);
}

/// Update the global inter-submission throttle gauge.
pub fn set_global_throttle(interval_ns: u64) {
    gauge!("engine_global_throttle_ns").set(interval_ns as f64);
}

/// Update a venue's throttle gauge.
pub fn set_venue_throttle(venue: &str, interval_ns: u64) {
    gauge!("venue_throttle_ns", "venue" => venue.to_string()).set(interval_ns as f64);
}

// ============================================================================
// Risk Gate Metrics
// ============================================================================

/// Record a risk decision.
///
/// # Arguments
///
/// * `accepted` - Whether the trade passed
/// * `rejection` - Rejection kind label (e.g., `"daily_loss"`), `None` when accepted
pub fn record_risk_decision(accepted: bool, rejection: Option<&str>) {
    if accepted {
        counter!("risk_decisions_total", "outcome" => "accepted").increment(1);
    } else {
        counter!(
            "risk_decisions_total",
            "outcome" => "rejected",
            "kind" => rejection.unwrap_or("unknown").to_string()
        )
        .increment(1);
    }
}

/// Trading mode gauge values.
pub mod trading_mode {
    /// Normal trading.
    pub const NORMAL: f64 = 0.0;
    /// Half size.
    pub const REDUCED: f64 = 1.0;
    /// Quarter size.
    pub const SAFE: f64 = 2.0;
    /// No new trades.
    pub const HALTED: f64 = 3.0;
}

/// Update the trading mode gauge (see [`trading_mode`]).
pub fn set_trading_mode(mode: f64) {
    gauge!("risk_trading_mode").set(mode);
}

// ============================================================================
// Resilience Metrics
// ============================================================================

/// Circuit breaker state values for the gauge metric.
pub mod circuit_breaker_state {
    /// Circuit is closed (normal operation).
    pub const CLOSED: f64 = 0.0;
    /// Circuit is open (failing fast).
    pub const OPEN: f64 = 1.0;
    /// Circuit is half-open (testing recovery).
    pub const HALF_OPEN: f64 = 2.0;
}

/// Update a named breaker's state gauge (see [`circuit_breaker_state`]).
pub fn set_circuit_breaker_state(name: &str, state: f64) {
    gauge!("circuit_breaker_state", "name" => name.to_string()).set(state);
}

/// Update the emergency stop gauge.
pub fn set_emergency_stop(active: bool) {
    gauge!("emergency_stop_active").set(if active { 1.0 } else { 0.0 });
}

/// Record a failed attempt that will be retried.
pub fn record_retry_attempt(operation: &str, error_type: &str) {
    counter!(
        "retry_attempts_total",
        "operation" => operation.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MetricsConfig::default();
        assert!(config.enabled);
        assert_eq!(config.listen_addr.port(), 9090);
        assert!(!config.latency_buckets.is_empty());
        assert!(config.latency_buckets.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_config_with_addr() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let config = MetricsConfig::with_addr(addr);
        assert_eq!(config.listen_addr.port(), 8080);
    }

    #[test]
    fn test_disabled_config_installs_nothing() {
        let config = MetricsConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(init_metrics(&config).is_ok());
    }

    #[test]
    fn test_partial_config_deserializes() {
        let config: MetricsConfig = serde_json::from_str(r#"{"enabled": false}"#).unwrap();
        assert!(!config.enabled);
        assert_eq!(config.listen_addr.port(), 9090);
    }

    #[test]
    fn test_recording_without_recorder() {
        // Recording requires an installed recorder; without one these are no-ops
        record_order_execution("alpha", true, 0.0004, 1.5);
        record_order_execution("alpha", false, 0.002, 0.0);
        record_ghost_submission();
        set_worker_count(4);
        set_global_throttle(1_000);
        set_venue_throttle("alpha", 20_000);
        record_risk_decision(true, None);
        record_risk_decision(false, Some("daily_loss"));
        set_trading_mode(trading_mode::SAFE);
        set_circuit_breaker_state("venue:alpha", circuit_breaker_state::OPEN);
        set_emergency_stop(true);
        record_retry_attempt("venue:alpha", "network");
    }

    #[test]
    fn test_gauge_constants() {
        assert!((circuit_breaker_state::HALF_OPEN - 2.0).abs() < f64::EPSILON);
        assert!(trading_mode::NORMAL < trading_mode::HALTED);
    }
}
