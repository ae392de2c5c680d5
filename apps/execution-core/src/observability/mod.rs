//! Prometheus instrumentation for the execution core.
//!
//! Logging and span export live in [`crate::telemetry`].

pub mod metrics;

pub use metrics::{MetricsConfig, MetricsError, init_metrics};
