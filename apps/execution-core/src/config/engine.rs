//! Execution engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::{
    AdaptiveSettings, EngineSettings, MAX_WORKERS, MIN_WORKERS, VenueConfig, VenueThrottleSettings,
};
use crate::resilience::RetryPolicy;

/// Execution engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Orders per batch.
    pub batch_size: usize,
    /// Partial batch flush timer (ms, 0 disables).
    pub batch_timeout_ms: u64,
    /// Workers spawned at start.
    pub initial_workers: usize,
    /// Adaptive sizing floor.
    pub min_workers: usize,
    /// Adaptive sizing ceiling.
    pub max_workers: usize,
    /// Batches buffered per worker.
    pub worker_queue_capacity: usize,
    /// Metrics retained in memory.
    pub metrics_capacity: usize,
    /// Starting global inter-submission interval (ns).
    pub global_throttle_ns: u64,
    /// Global interval ceiling (ns).
    pub max_global_throttle_ns: u64,
    /// Worker drain timeout on shutdown.
    pub shutdown_timeout_secs: u64,
    /// Per-venue throttle tuning.
    pub venue_throttle: VenueThrottleConfig,
    /// Adaptive control loop.
    pub adaptive: AdaptiveConfig,
    /// Venues registered at startup.
    pub venues: Vec<VenueConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            batch_timeout_ms: 100,
            initial_workers: 4,
            min_workers: MIN_WORKERS,
            max_workers: MAX_WORKERS,
            worker_queue_capacity: 16,
            metrics_capacity: 10_000,
            global_throttle_ns: 1_000,
            max_global_throttle_ns: 10_000_000,
            shutdown_timeout_secs: 30,
            venue_throttle: VenueThrottleConfig::default(),
            adaptive: AdaptiveConfig::default(),
            venues: vec![VenueConfig::new("primary", 1_000.0)],
        }
    }
}

/// Per-venue throttle tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VenueThrottleConfig {
    /// Slow sub-batch threshold (ms).
    pub slow_threshold_ms: u64,
    /// Fast sub-batch threshold (ms).
    pub fast_threshold_ms: u64,
    /// Interval ceiling (ns).
    pub ceiling_ns: u64,
    /// Minimum increase (ns).
    pub step_ns: u64,
}

impl Default for VenueThrottleConfig {
    fn default() -> Self {
        Self {
            slow_threshold_ms: 10,
            fast_threshold_ms: 1,
            ceiling_ns: 1_000_000,
            step_ns: 10_000,
        }
    }
}

/// Adaptive control loop configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// Run the loop.
    pub enabled: bool,
    /// Sampling period (seconds).
    pub interval_secs: u64,
    /// Shrink below this success rate.
    pub shrink_below_success: f64,
    /// Grow above this success rate.
    pub grow_above_success: f64,
    /// Minimum throughput (orders/s) before growing.
    pub grow_min_throughput: f64,
    /// Raise the global throttle above this p99 (µs).
    pub p99_high_us: u64,
    /// Lower the global throttle below this p99 (µs).
    pub p99_low_us: u64,
    /// Samples required per period.
    pub min_samples: usize,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            shrink_below_success: 0.95,
            grow_above_success: 0.98,
            grow_min_throughput: 100.0,
            p99_high_us: 1_000,
            p99_low_us: 100,
            min_samples: 10,
        }
    }
}

impl EngineConfig {
    /// Runtime engine settings. Venue calls use `venue_retry`.
    #[must_use]
    pub fn to_settings(&self, venue_retry: RetryPolicy) -> EngineSettings {
        let defaults = EngineSettings::default();
        EngineSettings {
            batch_size: self.batch_size,
            batch_timeout: Duration::from_millis(self.batch_timeout_ms),
            initial_workers: self.initial_workers,
            min_workers: self.min_workers,
            max_workers: self.max_workers,
            worker_queue_capacity: self.worker_queue_capacity,
            metrics_capacity: self.metrics_capacity,
            global_throttle_ns: self.global_throttle_ns,
            max_global_throttle_ns: self.max_global_throttle_ns,
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
            venue_retry,
            venue_throttle: VenueThrottleSettings {
                slow_threshold: Duration::from_millis(self.venue_throttle.slow_threshold_ms),
                fast_threshold: Duration::from_millis(self.venue_throttle.fast_threshold_ms),
                ceiling_ns: self.venue_throttle.ceiling_ns,
                step_ns: self.venue_throttle.step_ns,
            },
            adaptive: AdaptiveSettings {
                enabled: self.adaptive.enabled,
                interval: Duration::from_secs(self.adaptive.interval_secs),
                shrink_below_success: self.adaptive.shrink_below_success,
                grow_above_success: self.adaptive.grow_above_success,
                grow_min_throughput: self.adaptive.grow_min_throughput,
                p99_high: Duration::from_micros(self.adaptive.p99_high_us),
                p99_low: Duration::from_micros(self.adaptive.p99_low_us),
                min_samples: self.adaptive.min_samples,
            },
            ..defaults
        }
        .normalized()
    }
}
