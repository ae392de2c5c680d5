//! Batched multi-venue order execution.
//!
//! - [`ExecutionEngine`]: batching, dispatch, lifecycle and ghost mode
//! - [`VenueRegistry`] / [`VenueAdapter`]: venues and their per-venue throttle
//! - [`GlobalThrottle`]: minimum spacing between submissions
//! - [`MetricsSink`]: bounded execution metrics and summaries
//! - [`CapacityManager`]: license-derived instance cap
//!
//! Worker tasks and the adaptive control loop are internal.

mod capacity;
mod control;
mod error;
mod executor;
mod metrics;
mod order;
mod pool;
mod settings;
mod throttle;
mod venue;
mod worker;

pub use capacity::{CapacityError, CapacityManager, CapacitySettings, CapacityStatus, LicenseTier};
pub use control::{PoolAdjustment, ThrottleAdjustment, decide_pool, decide_throttle};
pub use error::EngineError;
pub use executor::{EngineMetrics, EngineState, ExecutionEngine, ExecutionListener};
pub use metrics::{
    ExecutionMetric, ExecutionReport, ExecutionResult, MetricsSink, MetricsSummary, VenueSummary,
};
pub use order::{Order, OrderBatch, OrderSide, OrderStatus, OrderType};
pub use pool::JoinSummary;
pub use settings::{
    AdaptiveSettings, EngineSettings, MAX_WORKERS, MIN_WORKERS, VenueThrottleSettings,
};
pub use throttle::GlobalThrottle;
pub use venue::{
    Fill, SimulatedVenue, ThrottleChange, Venue, VenueAdapter, VenueConfig, VenueRegistry,
    VenueStatus,
};
