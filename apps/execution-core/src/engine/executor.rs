//! The execution engine.
//!
//! Orders are throttled, appended to the current batch and, when the batch
//! fills (or on an explicit or timed flush), the batch is handed whole to the
//! next worker in round-robin order. Ordering is therefore FIFO within a batch
//! and unordered across batches.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::observability::metrics;
use crate::resilience::ResilienceHandler;

use super::capacity::CapacityManager;
use super::control::{ControlTargets, run_control_loop};
use super::error::EngineError;
use super::metrics::{ExecutionReport, ExecutionResult, MetricsSink, MetricsSummary};
use super::order::{Order, OrderBatch, OrderSide};
use super::pool::{JoinSummary, WorkerPool};
use super::settings::EngineSettings;
use super::throttle::GlobalThrottle;
use super::venue::{SimulatedVenue, VenueAdapter, VenueConfig, VenueRegistry, VenueStatus};
use super::worker::WorkerContext;

/// Receives every execution result from the engine's result loop.
///
/// Called on the result loop task; implementations must be quick and must
/// not block. A panicking listener is logged and skipped.
pub trait ExecutionListener: Send + Sync {
    /// Handle one result.
    fn on_result(&self, result: &ExecutionResult);
}

/// Engine lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineState {
    /// Constructed, not started.
    Idle,
    /// Dispatching to workers.
    Running,
    /// No capacity slot: accepting without dispatching.
    Ghost,
    /// Draining.
    Stopping,
    /// Stopped.
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Running => write!(f, "RUNNING"),
            Self::Ghost => write!(f, "GHOST"),
            Self::Stopping => write!(f, "STOPPING"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// Engine snapshot for observability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineMetrics {
    /// Engine instance id.
    pub instance_id: String,
    /// Lifecycle state.
    pub state: EngineState,
    /// Live workers.
    pub workers: usize,
    /// Orders waiting in the current batch.
    pub queued_orders: usize,
    /// Batches handed to workers.
    pub dispatched_batches: u64,
    /// Submissions answered with synthetic ids.
    pub ghost_submissions: u64,
    /// Global inter-submission interval.
    pub global_throttle_ns: u64,
    /// Aggregates over retained metrics.
    pub summary: MetricsSummary,
    /// Venue statuses.
    pub venues: Vec<VenueStatus>,
}

/// Batches and dispatches orders to a worker pool across venues.
pub struct ExecutionEngine {
    instance_id: String,
    settings: EngineSettings,
    venues: Arc<VenueRegistry>,
    resilience: Arc<ResilienceHandler>,
    capacity: Arc<CapacityManager>,
    sink: Arc<MetricsSink>,
    throttle: Arc<GlobalThrottle>,
    dispatcher: Arc<Dispatcher>,
    pool: Arc<Mutex<Option<WorkerPool>>>,
    listeners: Arc<RwLock<Vec<Arc<dyn ExecutionListener>>>>,
    state: Mutex<EngineState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
    control_cancel: CancellationToken,
    ghost_submissions: AtomicU64,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("instance_id", &self.instance_id)
            .field("state", &*self.state.lock())
            .field("venues", &self.venues.len())
            .finish_non_exhaustive()
    }
}

impl ExecutionEngine {
    /// Create an idle engine. `shutdown` cancels throttle and backoff sleeps.
    #[must_use]
    pub fn new(
        settings: EngineSettings,
        resilience: Arc<ResilienceHandler>,
        capacity: Arc<CapacityManager>,
        shutdown: CancellationToken,
    ) -> Self {
        let settings = settings.normalized();
        let pool = Arc::new(Mutex::new(None));
        Self {
            instance_id: format!("engine-{}", Uuid::new_v4()),
            venues: Arc::new(VenueRegistry::new()),
            sink: Arc::new(MetricsSink::new(settings.metrics_capacity)),
            throttle: Arc::new(GlobalThrottle::new(
                settings.global_throttle_ns,
                settings.min_global_throttle_ns,
                settings.max_global_throttle_ns,
            )),
            dispatcher: Arc::new(Dispatcher {
                batch_size: settings.batch_size,
                batch: Mutex::new(OrderBatch::new(settings.batch_size)),
                pool: Arc::clone(&pool),
                dispatched_batches: AtomicU64::new(0),
            }),
            pool,
            listeners: Arc::new(RwLock::new(Vec::new())),
            state: Mutex::new(EngineState::Idle),
            tasks: Mutex::new(Vec::new()),
            control_cancel: shutdown.child_token(),
            shutdown,
            resilience,
            capacity,
            settings,
            ghost_submissions: AtomicU64::new(0),
        }
    }

    /// Instance id used for capacity registration.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Effective settings.
    #[must_use]
    pub const fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Lifecycle state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }

    /// Register a venue with its adapter. Allowed at any time.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateVenue`] or
    /// [`EngineError::InvalidVenueConfig`].
    pub fn register_venue(
        &self,
        config: VenueConfig,
        adapter: Arc<dyn VenueAdapter>,
    ) -> Result<(), EngineError> {
        let venue = self.venues.register(config, adapter)?;
        tracing::info!(
            venue = %venue.name(),
            liquidity = venue.config().liquidity,
            "Venue registered"
        );
        Ok(())
    }

    /// Register a venue backed by [`SimulatedVenue`].
    pub fn register_simulated_venue(&self, config: VenueConfig) -> Result<(), EngineError> {
        self.register_venue(config, Arc::new(SimulatedVenue::new()))
    }

    /// Add a result listener.
    pub fn add_listener(&self, listener: Arc<dyn ExecutionListener>) {
        self.listeners.write().push(listener);
    }

    /// Register with the capacity manager and start workers.
    ///
    /// Without a capacity slot the engine enters [`EngineState::Ghost`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyRunning`] or
    /// [`EngineError::ShuttingDown`] when not idle.
    pub fn start(&self) -> Result<EngineState, EngineError> {
        let mut state = self.state.lock();
        match *state {
            EngineState::Idle => {}
            EngineState::Running | EngineState::Ghost => return Err(EngineError::AlreadyRunning),
            EngineState::Stopping | EngineState::Stopped => return Err(EngineError::ShuttingDown),
        }

        if let Err(e) = self.capacity.register(&self.instance_id) {
            tracing::warn!(
                instance_id = %self.instance_id,
                error = %e,
                "No capacity slot, engine running in ghost mode"
            );
            *state = EngineState::Ghost;
            return Ok(EngineState::Ghost);
        }

        let (results_tx, results_rx) = mpsc::channel(self.settings.result_queue_capacity);
        let ctx = WorkerContext {
            venues: Arc::clone(&self.venues),
            resilience: Arc::clone(&self.resilience),
            retry: self.settings.venue_retry.clone(),
            throttle: self.settings.venue_throttle,
            results: results_tx,
            cancel: self.shutdown.clone(),
        };
        let mut pool = WorkerPool::new(ctx, self.settings.worker_queue_capacity);
        pool.resize_to(self.settings.initial_workers);
        *self.pool.lock() = Some(pool);

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(run_result_loop(
            results_rx,
            Arc::clone(&self.sink),
            Arc::clone(&self.listeners),
        )));
        if !self.settings.batch_timeout.is_zero() {
            tasks.push(tokio::spawn(run_flush_loop(
                Arc::clone(&self.dispatcher),
                self.settings.batch_timeout,
                self.control_cancel.clone(),
            )));
        }
        if self.settings.adaptive.enabled {
            let targets = ControlTargets {
                sink: Arc::clone(&self.sink),
                pool: Arc::clone(&self.pool),
                throttle: Arc::clone(&self.throttle),
                min_workers: self.settings.min_workers,
                max_workers: self.settings.max_workers,
            };
            tasks.push(tokio::spawn(run_control_loop(
                targets,
                self.settings.adaptive,
                self.control_cancel.clone(),
            )));
        }

        metrics::set_global_throttle(self.throttle.interval_ns());
        *state = EngineState::Running;
        tracing::info!(
            instance_id = %self.instance_id,
            workers = self.settings.initial_workers,
            batch_size = self.settings.batch_size,
            "Execution engine started"
        );
        Ok(EngineState::Running)
    }

    /// Submit one order built from parts. A price makes it a limit order.
    pub async fn submit(
        &self,
        symbol: &str,
        side: OrderSide,
        amount: Decimal,
        price: Option<Decimal>,
        venue: Option<&str>,
    ) -> Result<String, EngineError> {
        let mut order = match price {
            Some(price) => Order::limit(symbol, side, amount, price),
            None => Order::market(symbol, side, amount),
        };
        order.venue = venue.map(str::to_string);
        self.submit_order(order).await
    }

    /// Submit one order. Returns its id once it sits in a batch (or, if that
    /// filled the batch, once the batch is dispatched).
    ///
    /// # Errors
    ///
    /// Invalid orders, unknown venues, and an engine that is not running are
    /// rejected immediately.
    pub async fn submit_order(&self, order: Order) -> Result<String, EngineError> {
        order.validate()?;
        match self.state() {
            EngineState::Running => {}
            EngineState::Ghost => return Ok(self.ghost_id()),
            EngineState::Idle => return Err(EngineError::NotRunning),
            EngineState::Stopping | EngineState::Stopped => return Err(EngineError::ShuttingDown),
        }
        match order.venue.as_deref() {
            Some(venue) if !self.venues.contains(venue) => {
                return Err(EngineError::UnknownVenue {
                    venue: venue.to_string(),
                });
            }
            None if self.venues.is_empty() => return Err(EngineError::NoVenues),
            _ => {}
        }

        self.throttle.wait(&self.shutdown).await?;

        let order_id = order.id.clone();
        if let Some(batch) = self.dispatcher.push(order) {
            self.dispatcher.dispatch(batch).await?;
        }
        Ok(order_id)
    }

    /// Submit several orders and flush, so every order is dispatched (not
    /// necessarily executed) on return. All orders are validated first.
    pub async fn submit_batch(&self, orders: Vec<Order>) -> Result<Vec<String>, EngineError> {
        for order in &orders {
            order.validate()?;
        }

        let mut ids = Vec::with_capacity(orders.len());
        for order in orders {
            match self.submit_order(order).await {
                Ok(id) => ids.push(id),
                Err(e) => {
                    self.flush().await?;
                    return Err(e);
                }
            }
        }
        self.flush().await?;
        Ok(ids)
    }

    /// Dispatch the current partial batch. Returns the worker it went to.
    pub async fn flush(&self) -> Result<Option<usize>, EngineError> {
        self.dispatcher.flush().await
    }

    fn ghost_id(&self) -> String {
        self.ghost_submissions.fetch_add(1, Ordering::Relaxed);
        metrics::record_ghost_submission();
        format!("ghost-{}", Uuid::new_v4())
    }

    /// Stop accepting orders, flush, drain workers and stop background tasks.
    pub async fn shutdown(&self) -> Result<JoinSummary, EngineError> {
        {
            let mut state = self.state.lock();
            match *state {
                EngineState::Running => *state = EngineState::Stopping,
                EngineState::Ghost | EngineState::Idle => {
                    *state = EngineState::Stopped;
                    return Ok(JoinSummary::default());
                }
                EngineState::Stopping | EngineState::Stopped => return Ok(JoinSummary::default()),
            }
        }
        tracing::info!(instance_id = %self.instance_id, "Execution engine stopping");

        if let Err(e) = self.flush().await {
            tracing::warn!(error = %e, "Final flush failed");
        }
        self.control_cancel.cancel();

        let pool = self.pool.lock().take();
        let summary = match pool {
            Some(pool) => pool.shutdown(self.settings.shutdown_timeout).await,
            None => JoinSummary::default(),
        };

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if tokio::time::timeout(self.settings.shutdown_timeout, task).await.is_err() {
                tracing::warn!("Background task did not stop before timeout");
            }
        }

        self.capacity.release(&self.instance_id);
        *self.state.lock() = EngineState::Stopped;
        tracing::info!(
            instance_id = %self.instance_id,
            clean = summary.clean,
            panicked = summary.panicked,
            timed_out = summary.timed_out,
            "Execution engine stopped"
        );
        Ok(summary)
    }

    /// Orders waiting in the current batch.
    #[must_use]
    pub fn queued_orders(&self) -> usize {
        self.dispatcher.batch.lock().len()
    }

    /// Live worker count.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.pool.lock().as_ref().map_or(0, WorkerPool::len)
    }

    /// The metrics sink.
    #[must_use]
    pub fn sink(&self) -> &MetricsSink {
        &self.sink
    }

    /// Observability snapshot.
    #[must_use]
    pub fn get_metrics(&self) -> EngineMetrics {
        EngineMetrics {
            instance_id: self.instance_id.clone(),
            state: self.state(),
            workers: self.worker_count(),
            queued_orders: self.queued_orders(),
            dispatched_batches: self.dispatcher.dispatched_batches.load(Ordering::Relaxed),
            ghost_submissions: self.ghost_submissions.load(Ordering::Relaxed),
            global_throttle_ns: self.throttle.interval_ns(),
            summary: self.sink.summary(),
            venues: self.venues.statuses(),
        }
    }
}

/// The open batch and the path from it to the workers.
///
/// Shared between submitters and the flush timer.
struct Dispatcher {
    batch_size: usize,
    batch: Mutex<OrderBatch>,
    pool: Arc<Mutex<Option<WorkerPool>>>,
    dispatched_batches: AtomicU64,
}

impl Dispatcher {
    /// Append an order. Returns a batch that is ready to dispatch.
    fn push(&self, order: Order) -> Option<OrderBatch> {
        let mut batch = self.batch.lock();
        let mut ready = None;
        if let Err(order) = batch.push(order) {
            let full = std::mem::replace(&mut *batch, OrderBatch::new(self.batch_size));
            ready = Some(full);
            if batch.push(order).is_err() {
                tracing::error!("Fresh batch rejected an order");
            }
        }
        if ready.is_none() && batch.is_full() {
            ready = Some(std::mem::replace(&mut *batch, OrderBatch::new(self.batch_size)));
        }
        ready
    }

    async fn flush(&self) -> Result<Option<usize>, EngineError> {
        let batch = {
            let mut batch = self.batch.lock();
            if batch.is_empty() {
                return Ok(None);
            }
            std::mem::replace(&mut *batch, OrderBatch::new(self.batch_size))
        };
        self.dispatch(batch).await.map(Some)
    }

    async fn dispatch(&self, mut batch: OrderBatch) -> Result<usize, EngineError> {
        let attempts = self.pool.lock().as_ref().map_or(0, WorkerPool::len) + 1;
        let mut last_worker = 0;

        for _ in 0..attempts {
            let (worker_id, tx) = {
                let mut guard = self.pool.lock();
                let pool = guard.as_mut().ok_or(EngineError::NotRunning)?;
                pool.next_sender().ok_or(EngineError::NotRunning)?
            };
            last_worker = worker_id;

            match tx.send(batch).await {
                Ok(()) => {
                    self.dispatched_batches.fetch_add(1, Ordering::Relaxed);
                    return Ok(worker_id);
                }
                Err(mpsc::error::SendError(returned)) => {
                    batch = returned;
                    if let Some(pool) = self.pool.lock().as_mut() {
                        pool.replace(worker_id);
                    }
                }
            }
        }
        Err(EngineError::WorkerUnavailable {
            worker_id: last_worker,
        })
    }
}

/// Dispatch whatever partial batch is waiting, every `every`.
async fn run_flush_loop(dispatcher: Arc<Dispatcher>, every: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!("Batch flush timer stopping");
                break;
            }
            _ = ticker.tick() => {
                match dispatcher.flush().await {
                    Ok(Some(worker_id)) => tracing::trace!(worker_id, "Partial batch flushed on timer"),
                    Ok(None) => {}
                    Err(e) => tracing::warn!(error = %e, "Timed batch flush failed"),
                }
            }
        }
    }
}

/// Single consumer of every worker's results.
async fn run_result_loop(
    mut results: mpsc::Receiver<ExecutionReport>,
    sink: Arc<MetricsSink>,
    listeners: Arc<RwLock<Vec<Arc<dyn ExecutionListener>>>>,
) {
    while let Some(report) = results.recv().await {
        let metric = &report.metric;
        metrics::record_order_execution(
            &metric.venue,
            metric.success,
            metric.latency_us / 1_000_000.0,
            metric.slippage_bps,
        );

        let listeners = listeners.read().clone();
        for listener in &listeners {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener.on_result(&report.result)));
            if outcome.is_err() {
                tracing::error!(order_id = %report.result.order_id, "Execution listener panicked");
            }
        }
        sink.record(report.metric);
    }
    tracing::debug!("Result loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::capacity::CapacitySettings;
    use crate::engine::order::OrderStatus;
    use crate::engine::venue::Fill;
    use crate::resilience::{ResilienceError, ResilienceSettings};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    #[derive(Default)]
    struct Collector {
        results: Mutex<Vec<ExecutionResult>>,
    }

    impl ExecutionListener for Collector {
        fn on_result(&self, result: &ExecutionResult) {
            self.results.lock().push(result.clone());
        }
    }

    #[derive(Default)]
    struct RecordingVenue {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl VenueAdapter for RecordingVenue {
        async fn execute(&self, order: &Order, _config: &VenueConfig) -> Result<Fill, ResilienceError> {
            self.calls.lock().push(order.symbol.clone());
            Ok(Fill {
                venue_order_id: order.id.clone(),
                filled_amount: order.amount,
                avg_price: order.price,
                fee: Decimal::ZERO,
                slippage_bps: 0.0,
            })
        }
    }

    fn settings(batch_size: usize, workers: usize) -> EngineSettings {
        EngineSettings {
            batch_size,
            batch_timeout: Duration::ZERO,
            initial_workers: workers,
            global_throttle_ns: 0,
            adaptive: crate::engine::settings::AdaptiveSettings {
                enabled: false,
                ..Default::default()
            },
            ..EngineSettings::default()
        }
    }

    fn engine_with(settings: EngineSettings, license: Option<&str>) -> ExecutionEngine {
        ExecutionEngine::new(
            settings,
            Arc::new(ResilienceHandler::new(
                ResilienceSettings::default(),
                CancellationToken::new(),
            )),
            Arc::new(CapacityManager::new(&CapacitySettings {
                license_key: license.map(String::from),
                max_instances_override: None,
            })),
            CancellationToken::new(),
        )
    }

    fn orders(n: usize) -> Vec<Order> {
        (0..n)
            .map(|i| Order::limit(format!("S{i}"), OrderSide::Buy, dec!(1), dec!(100)))
            .collect()
    }

    #[tokio::test]
    async fn test_submit_requires_start() {
        let engine = engine_with(settings(4, 1), None);
        engine.register_simulated_venue(VenueConfig::new("alpha", 100.0)).unwrap();
        let result = engine.submit("BTC/USD", OrderSide::Buy, dec!(1), None, None).await;
        assert_eq!(result, Err(EngineError::NotRunning));
    }

    #[tokio::test]
    async fn test_batch_executes_and_notifies_listeners() {
        let engine = engine_with(settings(2, 2), None);
        let collector = Arc::new(Collector::default());
        engine.add_listener(Arc::clone(&collector) as Arc<dyn ExecutionListener>);
        engine
            .register_simulated_venue(VenueConfig {
                latency_ms: 0.0,
                ..VenueConfig::new("alpha", 100.0)
            })
            .unwrap();
        assert_eq!(engine.start(), Ok(EngineState::Running));

        let ids = engine.submit_batch(orders(5)).await.unwrap();
        assert_eq!(ids.len(), 5);
        assert_eq!(engine.queued_orders(), 0);

        let summary = engine.shutdown().await.unwrap();
        assert_eq!(summary.panicked, 0);

        let results = collector.results.lock();
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| r.status == OrderStatus::Filled));
        assert_eq!(engine.sink().len(), 5);
        assert_eq!(engine.get_metrics().dispatched_batches, 3);
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[tokio::test]
    async fn test_partial_batch_dispatched_on_timer() {
        let engine = engine_with(
            EngineSettings {
                batch_timeout: Duration::from_millis(20),
                ..settings(10, 1)
            },
            None,
        );
        let collector = Arc::new(Collector::default());
        engine.add_listener(Arc::clone(&collector) as Arc<dyn ExecutionListener>);
        let venue = Arc::new(RecordingVenue::default());
        engine
            .register_venue(VenueConfig::new("alpha", 100.0), Arc::clone(&venue) as Arc<dyn VenueAdapter>)
            .unwrap();
        engine.start().unwrap();

        engine.submit("BTC/USD", OrderSide::Buy, dec!(1), Some(dec!(100)), None).await.unwrap();

        let executed = tokio::time::timeout(Duration::from_secs(2), async {
            while collector.results.lock().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(executed.is_ok(), "lone order was never dispatched");
        assert_eq!(engine.queued_orders(), 0);
        assert_eq!(engine.get_metrics().dispatched_batches, 1);

        engine.shutdown().await.unwrap();
        assert_eq!(*venue.calls.lock(), vec!["BTC/USD".to_string()]);
    }

    #[tokio::test]
    async fn test_single_worker_preserves_submission_order() {
        let engine = engine_with(settings(3, 1), None);
        let venue = Arc::new(RecordingVenue::default());
        engine
            .register_venue(VenueConfig::new("alpha", 100.0), Arc::clone(&venue) as Arc<dyn VenueAdapter>)
            .unwrap();
        engine.start().unwrap();

        let batch = orders(7);
        let expected: Vec<String> = batch.iter().map(|o| o.symbol.clone()).collect();
        engine.submit_batch(batch).await.unwrap();
        engine.shutdown().await.unwrap();

        assert_eq!(*venue.calls.lock(), expected);
    }

    #[tokio::test]
    async fn test_batches_never_exceed_capacity() {
        let engine = engine_with(settings(3, 2), None);
        engine
            .register_simulated_venue(VenueConfig {
                latency_ms: 0.0,
                ..VenueConfig::new("alpha", 100.0)
            })
            .unwrap();
        engine.start().unwrap();
        engine.submit_batch(orders(10)).await.unwrap();
        engine.shutdown().await.unwrap();

        let mut per_batch = std::collections::HashMap::new();
        for metric in engine.sink().recent(100) {
            *per_batch.entry(metric.batch_id).or_insert(0usize) += 1;
        }
        assert_eq!(per_batch.values().sum::<usize>(), 10);
        assert!(per_batch.values().all(|&n| n <= 3));
    }

    #[tokio::test]
    async fn test_unknown_venue_rejected_at_submit() {
        let engine = engine_with(settings(2, 1), None);
        engine.register_simulated_venue(VenueConfig::new("alpha", 100.0)).unwrap();
        engine.start().unwrap();

        let result = engine
            .submit("BTC/USD", OrderSide::Buy, dec!(1), None, Some("nowhere"))
            .await;
        assert!(matches!(result, Err(EngineError::UnknownVenue { .. })));
        assert_eq!(engine.queued_orders(), 0);
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_ghost_mode_returns_synthetic_ids() {
        let engine = engine_with(settings(2, 1), Some("not-a-tier"));
        engine.register_simulated_venue(VenueConfig::new("alpha", 100.0)).unwrap();
        assert_eq!(engine.start(), Ok(EngineState::Ghost));

        let id = engine
            .submit("BTC/USD", OrderSide::Buy, dec!(1), None, None)
            .await
            .unwrap();
        assert!(id.starts_with("ghost-"));
        assert_eq!(engine.worker_count(), 0);
        assert_eq!(engine.get_metrics().ghost_submissions, 1);
        assert!(engine.sink().is_empty());
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_rejected() {
        let engine = engine_with(settings(2, 1), None);
        engine.register_simulated_venue(VenueConfig::new("alpha", 100.0)).unwrap();
        engine.start().unwrap();
        engine.shutdown().await.unwrap();

        let result = engine.submit("BTC/USD", OrderSide::Buy, dec!(1), None, None).await;
        assert_eq!(result, Err(EngineError::ShuttingDown));
        assert_eq!(engine.start(), Err(EngineError::ShuttingDown));
    }
}
