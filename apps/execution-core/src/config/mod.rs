//! Configuration for the execution core.
//!
//! Loads YAML with environment variable interpolation, validates it, and
//! converts each section into the runtime settings of its component.
//!
//! # Usage
//!
//! ```rust,ignore
//! use execution_core::config::load_config;
//!
//! // Load from default path (config.yaml)
//! let config = load_config(None)?;
//!
//! let limits = &config.risk.limits;
//! let engine = config.engine.to_settings(config.resilience.retry.to_policy());
//! ```

mod engine;
mod observability;
mod persistence;
mod resilience;
mod risk;
mod server;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::{CapacitySettings, MAX_WORKERS, MIN_WORKERS};

pub use engine::{AdaptiveConfig, EngineConfig, VenueThrottleConfig};
pub use observability::{LoggingConfig, ObservabilityConfig, TracingConfig};
pub use persistence::PersistenceConfig;
pub use resilience::{CircuitBreakerConfig, ResilienceConfig, RetryConfig};
pub use risk::RiskConfig;
pub use server::ServerConfig;

/// Default config path.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Root configuration structure. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Execution engine.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Risk gate.
    #[serde(default)]
    pub risk: RiskConfig,
    /// Resilience layer.
    #[serde(default)]
    pub resilience: ResilienceConfig,
    /// Instance capacity licensing.
    #[serde(default)]
    pub capacity: CapacitySettings,
    /// State snapshots.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Logging, tracing and metrics.
    #[serde(default)]
    pub observability: ObservabilityConfig,
    /// Status API.
    #[serde(default)]
    pub server: ServerConfig,
}

// ============================================
// Configuration Loading
// ============================================

/// Load configuration from a YAML file with environment variable interpolation.
///
/// # Arguments
///
/// * `path` - Optional path to the config file. Defaults to "config.yaml".
///
/// # Errors
///
/// Returns a `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or(DEFAULT_CONFIG_PATH);

    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_string(),
        source: e,
    })?;

    load_config_from_string(&contents)
}

/// Load configuration from a YAML string (useful for testing).
///
/// # Errors
///
/// Returns a `ConfigError` if the YAML cannot be parsed or validated.
pub fn load_config_from_string(yaml: &str) -> Result<Config, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);
    let config: Config = if interpolated.trim().is_empty() {
        Config::default()
    } else {
        serde_yaml_bw::from_str(&interpolated)?
    };
    validate_config(&config)?;
    Ok(config)
}

/// Interpolate environment variables in a string.
///
/// Supports both `${VAR}` and `${VAR:-default}` syntax.
#[allow(clippy::expect_used)] // Regex is compile-time constant; expect() is safe here
fn interpolate_env_vars(input: &str) -> String {
    use std::sync::OnceLock;

    static ENV_VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

    let re = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var regex is valid")
    });

    re.replace_all(input, |cap: &regex::Captures<'_>| {
        let default_value = cap.get(2).map_or("", |m| m.as_str());
        match cap.get(1).map(|m| std::env::var(m.as_str())) {
            Some(Ok(v)) if !v.is_empty() => v,
            _ => default_value.to_string(),
        }
    })
    .into_owned()
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

/// Validate configuration values.
///
/// # Errors
///
/// Returns [`ConfigError::ValidationError`] naming the first bad field.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let engine = &config.engine;
    if engine.batch_size == 0 {
        return Err(invalid("engine.batch_size must be positive"));
    }
    if engine.min_workers < MIN_WORKERS || engine.max_workers > MAX_WORKERS {
        return Err(invalid(format!(
            "engine worker bounds must lie within [{MIN_WORKERS}, {MAX_WORKERS}]"
        )));
    }
    if engine.min_workers > engine.max_workers {
        return Err(invalid("engine.min_workers must not exceed engine.max_workers"));
    }
    if !(engine.min_workers..=engine.max_workers).contains(&engine.initial_workers) {
        return Err(invalid(
            "engine.initial_workers must lie within [min_workers, max_workers]",
        ));
    }
    if engine.worker_queue_capacity == 0 || engine.metrics_capacity == 0 {
        return Err(invalid(
            "engine.worker_queue_capacity and engine.metrics_capacity must be positive",
        ));
    }
    if engine.global_throttle_ns > engine.max_global_throttle_ns {
        return Err(invalid(
            "engine.global_throttle_ns must not exceed engine.max_global_throttle_ns",
        ));
    }
    if engine.venue_throttle.fast_threshold_ms > engine.venue_throttle.slow_threshold_ms {
        return Err(invalid(
            "engine.venue_throttle.fast_threshold_ms must not exceed slow_threshold_ms",
        ));
    }
    let adaptive = &engine.adaptive;
    if adaptive.interval_secs == 0 {
        return Err(invalid("engine.adaptive.interval_secs must be positive"));
    }
    if !(0.0..=1.0).contains(&adaptive.shrink_below_success)
        || !(0.0..=1.0).contains(&adaptive.grow_above_success)
        || adaptive.shrink_below_success > adaptive.grow_above_success
    {
        return Err(invalid(
            "engine.adaptive success thresholds must satisfy 0 <= shrink <= grow <= 1",
        ));
    }
    let mut names = std::collections::HashSet::new();
    for venue in &engine.venues {
        venue
            .validate()
            .map_err(|e| invalid(format!("engine.venues: {e}")))?;
        if !names.insert(venue.name.as_str()) {
            return Err(invalid(format!(
                "engine.venues: duplicate venue '{}'",
                venue.name
            )));
        }
    }

    if config.risk.initial_capital <= rust_decimal::Decimal::ZERO {
        return Err(invalid("risk.initial_capital must be positive"));
    }
    config
        .risk
        .limits
        .validate()
        .map_err(|e| invalid(format!("risk.limits: {e}")))?;

    let resilience = &config.resilience;
    if resilience.retry.max_attempts == 0 {
        return Err(invalid("resilience.retry.max_attempts must be positive"));
    }
    if resilience.retry.delays_ms.is_empty() {
        return Err(invalid("resilience.retry.delays_ms must not be empty"));
    }
    if resilience.circuit_breaker.failure_threshold == 0 {
        return Err(invalid(
            "resilience.circuit_breaker.failure_threshold must be positive",
        ));
    }
    if resilience.emergency_failure_threshold == 0 {
        return Err(invalid(
            "resilience.emergency_failure_threshold must be positive",
        ));
    }
    if resilience.history_trim >= resilience.history_cap {
        return Err(invalid(
            "resilience.history_cap must exceed resilience.history_trim",
        ));
    }

    if config.persistence.enabled && config.persistence.snapshot_path.trim().is_empty() {
        return Err(invalid("persistence.snapshot_path must not be empty"));
    }

    let valid_formats = ["json", "pretty"];
    if !valid_formats.contains(&config.observability.logging.format.as_str()) {
        return Err(invalid(format!(
            "observability.logging.format must be one of: {valid_formats:?}"
        )));
    }

    if config.server.enabled && config.server.http_port == config.observability.metrics.listen_addr.port()
        && config.observability.metrics.enabled
    {
        return Err(invalid(
            "server.http_port and the metrics listener port must be different",
        ));
    }

    Ok(())
}
