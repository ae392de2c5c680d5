//! Adaptive control loop: pool sizing and global throttle.
//!
//! Every `interval` the loop summarises the metrics recorded since the last
//! tick. Pool size moves by at most one worker per tick within
//! `[min_workers, max_workers]`; the global throttle moves independently
//! based on p99 latency.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::observability::metrics;

use super::metrics::{MetricsSink, MetricsSummary};
use super::pool::WorkerPool;
use super::settings::AdaptiveSettings;
use super::throttle::GlobalThrottle;

/// Pool sizing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolAdjustment {
    /// Add a worker.
    Grow,
    /// Remove a worker.
    Shrink,
    /// Leave as is.
    Hold,
}

/// Global throttle decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleAdjustment {
    /// Space submissions further apart.
    Increase,
    /// Space them closer.
    Decrease,
    /// Leave as is.
    Hold,
}

/// Shrink below the success floor; grow when healthy and busy.
#[must_use]
pub fn decide_pool(summary: &MetricsSummary, settings: &AdaptiveSettings) -> PoolAdjustment {
    if summary.success_rate < settings.shrink_below_success {
        PoolAdjustment::Shrink
    } else if summary.success_rate > settings.grow_above_success
        && summary.throughput_per_sec > settings.grow_min_throughput
    {
        PoolAdjustment::Grow
    } else {
        PoolAdjustment::Hold
    }
}

/// Increase the throttle when p99 is slow, decrease it when p99 is fast.
#[must_use]
pub fn decide_throttle(summary: &MetricsSummary, settings: &AdaptiveSettings) -> ThrottleAdjustment {
    let p99 = Duration::from_secs_f64(summary.p99_latency_us.max(0.0) / 1_000_000.0);
    if p99 > settings.p99_high {
        ThrottleAdjustment::Increase
    } else if p99 < settings.p99_low {
        ThrottleAdjustment::Decrease
    } else {
        ThrottleAdjustment::Hold
    }
}

/// What the control loop acts on.
pub(crate) struct ControlTargets {
    pub(crate) sink: Arc<MetricsSink>,
    pub(crate) pool: Arc<Mutex<Option<WorkerPool>>>,
    pub(crate) throttle: Arc<GlobalThrottle>,
    pub(crate) min_workers: usize,
    pub(crate) max_workers: usize,
}

/// Apply one tick's decisions. Returns the pool size afterwards.
pub(crate) fn apply(
    targets: &ControlTargets,
    summary: &MetricsSummary,
    settings: &AdaptiveSettings,
) -> Option<usize> {
    let pool_change = decide_pool(summary, settings);
    let workers = {
        let mut guard = targets.pool.lock();
        let pool = guard.as_mut()?;
        match pool_change {
            PoolAdjustment::Grow if pool.len() < targets.max_workers => {
                pool.spawn();
            }
            PoolAdjustment::Shrink if pool.len() > targets.min_workers => {
                pool.retire();
            }
            _ => {}
        }
        pool.len()
    };

    let throttle_ns = match decide_throttle(summary, settings) {
        ThrottleAdjustment::Increase => Some(targets.throttle.increase()),
        ThrottleAdjustment::Decrease => Some(targets.throttle.decrease()),
        ThrottleAdjustment::Hold => None,
    };
    if let Some(ns) = throttle_ns {
        metrics::set_global_throttle(ns);
    }

    tracing::info!(
        success_rate = summary.success_rate,
        throughput = summary.throughput_per_sec,
        p99_us = summary.p99_latency_us,
        decision = ?pool_change,
        workers,
        throttle_ns = targets.throttle.interval_ns(),
        "Adaptive control tick"
    );
    Some(workers)
}

pub(crate) async fn run_control_loop(
    targets: ControlTargets,
    settings: AdaptiveSettings,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(settings.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    let mut since = Utc::now();

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!("Adaptive control loop stopping");
                break;
            }
            _ = ticker.tick() => {
                let summary = targets.sink.summary_since(since);
                since = Utc::now();
                if summary.total_orders < settings.min_samples {
                    continue;
                }
                apply(&targets, &summary, &settings);
            }
        }
    }
}
