//! Venues: configuration, the adapter port, the simulated adapter and the
//! registry workers resolve venues from.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::resilience::{ErrorType, ResilienceError};

use super::error::EngineError;
use super::order::Order;
use super::settings::VenueThrottleSettings;

/// Static description of a venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VenueConfig {
    /// Unique venue name.
    pub name: String,
    /// Units that trade without meaningful price impact.
    pub liquidity: f64,
    /// Spread cost paid on every fill, in basis points.
    pub base_spread_bps: f64,
    /// Additional slippage, in bps, when an order consumes all of `liquidity`.
    pub impact_bps: f64,
    /// Slippage ceiling, in bps.
    pub max_slippage_bps: f64,
    /// Typical round-trip latency.
    pub latency_ms: f64,
    /// Taker fee rate (fraction of notional).
    pub fee_rate: Decimal,
    /// Lowest per-order spacing the adaptive throttle may reach.
    pub throttle_floor_ns: u64,
    /// Starting per-order spacing.
    pub initial_throttle_ns: u64,
    /// Simulated transient failure probability in [0, 1].
    pub failure_rate: f64,
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            liquidity: 1_000.0,
            base_spread_bps: 1.0,
            impact_bps: 25.0,
            max_slippage_bps: 500.0,
            latency_ms: 0.5,
            fee_rate: Decimal::new(1, 3),
            throttle_floor_ns: 0,
            initial_throttle_ns: 0,
            failure_rate: 0.0,
        }
    }
}

impl VenueConfig {
    /// Config with defaults and the given name and liquidity.
    #[must_use]
    pub fn new(name: impl Into<String>, liquidity: f64) -> Self {
        Self {
            name: name.into(),
            liquidity,
            ..Self::default()
        }
    }

    /// Slippage model: spread plus impact proportional to the share of
    /// liquidity the order consumes, capped.
    #[must_use]
    pub fn estimate_slippage_bps(&self, amount: Decimal) -> f64 {
        let amount = amount.abs().to_f64().unwrap_or(0.0);
        let participation = if self.liquidity > 0.0 {
            amount / self.liquidity
        } else {
            1.0
        };
        (self.base_spread_bps + self.impact_bps * participation).min(self.max_slippage_bps)
    }

    /// Check the config is usable.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidVenueConfig`] for an empty name,
    /// non-positive liquidity, negative costs, or a failure rate outside [0, 1].
    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |reason: &str| EngineError::InvalidVenueConfig {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name is empty"));
        }
        if self.liquidity.is_nan() || self.liquidity <= 0.0 {
            return Err(invalid("liquidity must be positive"));
        }
        if self.base_spread_bps < 0.0 || self.impact_bps < 0.0 || self.max_slippage_bps < 0.0 {
            return Err(invalid("slippage parameters must be non-negative"));
        }
        if self.latency_ms < 0.0 || self.fee_rate < Decimal::ZERO {
            return Err(invalid("latency and fee rate must be non-negative"));
        }
        if !(0.0..=1.0).contains(&self.failure_rate) {
            return Err(invalid("failure_rate must be within [0, 1]"));
        }
        Ok(())
    }
}

/// A venue's acknowledgement of an executed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    /// Venue-assigned identifier.
    pub venue_order_id: String,
    /// Quantity filled.
    pub filled_amount: Decimal,
    /// Average fill price, when the order had a reference price.
    pub avg_price: Option<Decimal>,
    /// Fees charged.
    pub fee: Decimal,
    /// Realized slippage in basis points (positive = adverse).
    pub slippage_bps: f64,
}

/// Port to an external trading destination.
///
/// Implementations perform one attempt; retry and circuit breaking are the
/// caller's job. Failures use the canonical resilience taxonomy.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    /// Execute one order.
    async fn execute(&self, order: &Order, config: &VenueConfig) -> Result<Fill, ResilienceError>;
}

/// Adapter that models slippage from liquidity and latency from config.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedVenue;

impl SimulatedVenue {
    /// Create the adapter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl VenueAdapter for SimulatedVenue {
    async fn execute(&self, order: &Order, config: &VenueConfig) -> Result<Fill, ResilienceError> {
        let (latency, failed) = {
            let mut rng = rand::rng();
            let jitter = rng.random_range(0.8..1.2);
            let failed = config.failure_rate > 0.0 && rng.random_bool(config.failure_rate);
            (
                Duration::from_secs_f64((config.latency_ms * jitter).max(0.0) / 1_000.0),
                failed,
            )
        };
        tokio::time::sleep(latency).await;

        if failed {
            return Err(ResilienceError::classified(
                ErrorType::Network,
                format!("{}: simulated connection reset", config.name),
            ));
        }

        let slippage_bps = config.estimate_slippage_bps(order.amount);
        let avg_price = order.price.map(|price| {
            let shift = Decimal::try_from(slippage_bps / 10_000.0).unwrap_or(Decimal::ZERO);
            let signed = shift * Decimal::from(order.side.sign());
            (price * (Decimal::ONE + signed)).round_dp(8)
        });
        let fee = avg_price
            .map(|p| (p * order.amount * config.fee_rate).round_dp(8))
            .unwrap_or(Decimal::ZERO);

        Ok(Fill {
            venue_order_id: Uuid::new_v4().to_string(),
            filled_amount: order.amount,
            avg_price,
            fee,
            slippage_bps,
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// A throttle interval change made after a sub-batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleChange {
    /// Interval before, in ns.
    pub from_ns: u64,
    /// Interval after, in ns.
    pub to_ns: u64,
}

/// A registered venue with its live load and throttle.
pub struct Venue {
    config: VenueConfig,
    adapter: Arc<dyn VenueAdapter>,
    throttle_ns: AtomicU64,
    in_flight: AtomicU64,
    processed: AtomicU64,
}

impl std::fmt::Debug for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Venue")
            .field("name", &self.config.name)
            .field("throttle_ns", &self.throttle_ns())
            .field("in_flight", &self.load())
            .finish_non_exhaustive()
    }
}

impl Venue {
    fn new(config: VenueConfig, adapter: Arc<dyn VenueAdapter>) -> Self {
        let throttle = config.initial_throttle_ns.max(config.throttle_floor_ns);
        Self {
            config,
            adapter,
            throttle_ns: AtomicU64::new(throttle),
            in_flight: AtomicU64::new(0),
            processed: AtomicU64::new(0),
        }
    }

    /// Venue name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Static config.
    #[must_use]
    pub const fn config(&self) -> &VenueConfig {
        &self.config
    }

    /// Current per-order spacing.
    #[must_use]
    pub fn throttle_ns(&self) -> u64 {
        self.throttle_ns.load(Ordering::Relaxed)
    }

    /// Orders currently executing.
    #[must_use]
    pub fn load(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Execute through the adapter, tracking load.
    ///
    /// An adapter panic becomes a terminal [`ErrorType::Unknown`] failure for
    /// this order only.
    pub(crate) async fn execute(&self, order: &Order) -> Result<Fill, ResilienceError> {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        let result = AssertUnwindSafe(self.adapter.execute(order, &self.config))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let message = panic_message(panic.as_ref());
                tracing::error!(
                    venue = %self.config.name,
                    order_id = %order.id,
                    panic = %message,
                    "Venue adapter panicked"
                );
                Err(ResilienceError::classified(
                    ErrorType::Unknown,
                    format!("{}: adapter panicked: {message}", self.config.name),
                ))
            });
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        self.processed.fetch_add(1, Ordering::Relaxed);
        result
    }

    /// Adapt the spacing to how long a sub-batch took.
    ///
    /// Slow sub-batches double the interval (at least one step) up to the
    /// ceiling; fast ones halve it down to the venue's floor.
    pub fn adjust_throttle(
        &self,
        elapsed: Duration,
        settings: &VenueThrottleSettings,
    ) -> Option<ThrottleChange> {
        let floor = self.config.throttle_floor_ns.min(settings.ceiling_ns);
        let current = self.throttle_ns();
        let next = if elapsed > settings.slow_threshold {
            current
                .saturating_mul(2)
                .max(current.saturating_add(settings.step_ns))
                .min(settings.ceiling_ns)
        } else if elapsed < settings.fast_threshold {
            (current / 2).max(floor)
        } else {
            current
        };

        if next == current {
            return None;
        }
        self.throttle_ns.store(next, Ordering::Relaxed);
        Some(ThrottleChange {
            from_ns: current,
            to_ns: next,
        })
    }

    /// Observability view.
    #[must_use]
    pub fn status(&self) -> VenueStatus {
        VenueStatus {
            name: self.config.name.clone(),
            liquidity: self.config.liquidity,
            throttle_ns: self.throttle_ns(),
            in_flight: self.load(),
            processed: self.processed.load(Ordering::Relaxed),
        }
    }
}

/// Venue snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueStatus {
    /// Name.
    pub name: String,
    /// Liquidity estimate.
    pub liquidity: f64,
    /// Current per-order spacing.
    pub throttle_ns: u64,
    /// Orders executing now.
    pub in_flight: u64,
    /// Orders executed since registration.
    pub processed: u64,
}

#[derive(Debug, Default)]
struct RegistryInner {
    venues: HashMap<String, Arc<Venue>>,
    order: Vec<String>,
}

/// Registered venues.
///
/// Registration may happen at any time; workers resolve venues by name per
/// sub-batch under the read lock. The first registered venue is the default
/// for orders that do not name one.
#[derive(Debug, Default)]
pub struct VenueRegistry {
    inner: RwLock<RegistryInner>,
}

impl VenueRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a venue.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidVenueConfig`] or
    /// [`EngineError::DuplicateVenue`].
    pub fn register(
        &self,
        config: VenueConfig,
        adapter: Arc<dyn VenueAdapter>,
    ) -> Result<Arc<Venue>, EngineError> {
        config.validate()?;
        let mut inner = self.inner.write();
        if inner.venues.contains_key(&config.name) {
            return Err(EngineError::DuplicateVenue { name: config.name });
        }

        let name = config.name.clone();
        let venue = Arc::new(Venue::new(config, adapter));
        inner.venues.insert(name.clone(), Arc::clone(&venue));
        inner.order.push(name);
        Ok(venue)
    }

    /// Look up a venue.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Venue>> {
        self.inner.read().venues.get(name).cloned()
    }

    /// Whether a venue is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().venues.contains_key(name)
    }

    /// Name of the default venue.
    #[must_use]
    pub fn default_venue(&self) -> Option<String> {
        self.inner.read().order.first().cloned()
    }

    /// Registered venue count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Status of every venue in registration order.
    #[must_use]
    pub fn statuses(&self) -> Vec<VenueStatus> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|name| inner.venues.get(name))
            .map(|venue| venue.status())
            .collect()
    }
}
