//! Runtime settings for the execution engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resilience::RetryPolicy;

/// Hard bounds on the worker pool.
pub const MIN_WORKERS: usize = 1;
/// Hard bounds on the worker pool.
pub const MAX_WORKERS: usize = 32;

/// Per-venue adaptive throttle tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueThrottleSettings {
    /// Sub-batches slower than this raise the venue's interval.
    pub slow_threshold: Duration,
    /// Sub-batches faster than this lower it.
    pub fast_threshold: Duration,
    /// Highest interval, in ns.
    pub ceiling_ns: u64,
    /// Minimum increase, in ns.
    pub step_ns: u64,
}

impl Default for VenueThrottleSettings {
    fn default() -> Self {
        Self {
            slow_threshold: Duration::from_millis(10),
            fast_threshold: Duration::from_millis(1),
            ceiling_ns: 1_000_000,
            step_ns: 10_000,
        }
    }
}

/// Background pool-sizing and global-throttle control.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveSettings {
    /// Run the control loop.
    pub enabled: bool,
    /// Sampling period.
    pub interval: Duration,
    /// Shrink the pool when the success rate falls below this.
    pub shrink_below_success: f64,
    /// Grow the pool when the success rate is above this...
    pub grow_above_success: f64,
    /// ...and throughput (orders/s) exceeds this.
    pub grow_min_throughput: f64,
    /// Raise the global throttle when p99 latency exceeds this.
    pub p99_high: Duration,
    /// Lower the global throttle when p99 latency is under this.
    pub p99_low: Duration,
    /// Samples required before acting.
    pub min_samples: usize,
}

impl Default for AdaptiveSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
            shrink_below_success: 0.95,
            grow_above_success: 0.98,
            grow_min_throughput: 100.0,
            p99_high: Duration::from_millis(1),
            p99_low: Duration::from_micros(100),
            min_samples: 10,
        }
    }
}

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Orders per batch.
    pub batch_size: usize,
    /// Longest a partial batch waits before it is dispatched. Zero disables
    /// the timer, leaving partial batches to explicit flushes.
    pub batch_timeout: Duration,
    /// Workers spawned at start.
    pub initial_workers: usize,
    /// Pool floor for adaptive sizing.
    pub min_workers: usize,
    /// Pool ceiling for adaptive sizing.
    pub max_workers: usize,
    /// Batches buffered per worker before submitters wait.
    pub worker_queue_capacity: usize,
    /// Results buffered before workers wait.
    pub result_queue_capacity: usize,
    /// Metrics retained in the sink.
    pub metrics_capacity: usize,
    /// Starting global inter-submission interval, in ns.
    pub global_throttle_ns: u64,
    /// Lowest global interval, in ns.
    pub min_global_throttle_ns: u64,
    /// Highest global interval, in ns.
    pub max_global_throttle_ns: u64,
    /// Retry policy for venue calls.
    pub venue_retry: RetryPolicy,
    /// Per-venue throttle tuning.
    pub venue_throttle: VenueThrottleSettings,
    /// Control loop tuning.
    pub adaptive: AdaptiveSettings,
    /// How long shutdown waits for workers to drain.
    pub shutdown_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            batch_size: 50,
            batch_timeout: Duration::from_millis(100),
            initial_workers: 4,
            min_workers: MIN_WORKERS,
            max_workers: MAX_WORKERS,
            worker_queue_capacity: 16,
            result_queue_capacity: 1024,
            metrics_capacity: 10_000,
            global_throttle_ns: 1_000,
            min_global_throttle_ns: 0,
            max_global_throttle_ns: 10_000_000,
            venue_retry: RetryPolicy::default(),
            venue_throttle: VenueThrottleSettings::default(),
            adaptive: AdaptiveSettings::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl EngineSettings {
    /// Clamp the worker bounds into `[MIN_WORKERS, MAX_WORKERS]` and the
    /// initial count into the bounds.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.min_workers = self.min_workers.clamp(MIN_WORKERS, MAX_WORKERS);
        self.max_workers = self.max_workers.clamp(self.min_workers, MAX_WORKERS);
        self.initial_workers = self.initial_workers.clamp(self.min_workers, self.max_workers);
        self.batch_size = self.batch_size.max(1);
        self.worker_queue_capacity = self.worker_queue_capacity.max(1);
        self.result_queue_capacity = self.result_queue_capacity.max(1);
        self.max_global_throttle_ns = self.max_global_throttle_ns.max(self.min_global_throttle_ns);
        self.global_throttle_ns = self
            .global_throttle_ns
            .clamp(self.min_global_throttle_ns, self.max_global_throttle_ns);
        self
    }
}
