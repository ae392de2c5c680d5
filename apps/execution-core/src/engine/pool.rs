//! Worker pool supervisor: spawn, retire, round-robin assignment, join.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::observability::metrics;

use super::order::OrderBatch;
use super::worker::{WorkerContext, run_worker};

#[derive(Debug)]
struct WorkerHandle {
    id: usize,
    tx: mpsc::Sender<OrderBatch>,
    join: JoinHandle<()>,
}

/// Result of joining every worker at shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinSummary {
    /// Workers that exited cleanly.
    pub clean: usize,
    /// Workers that panicked.
    pub panicked: usize,
    /// Workers still running when the timeout hit (aborted).
    pub timed_out: usize,
}

/// Owns the workers and their input channels.
///
/// Each worker has its own bounded channel; a batch is moved whole into
/// exactly one channel. Retiring a worker closes its channel, so it drains
/// what it already has and exits.
#[derive(Debug)]
pub(crate) struct WorkerPool {
    ctx: WorkerContext,
    queue_capacity: usize,
    workers: Vec<WorkerHandle>,
    retired: Vec<(usize, JoinHandle<()>)>,
    next_id: usize,
    cursor: usize,
}

impl WorkerPool {
    pub(crate) fn new(ctx: WorkerContext, queue_capacity: usize) -> Self {
        Self {
            ctx,
            queue_capacity: queue_capacity.max(1),
            workers: Vec::new(),
            retired: Vec::new(),
            next_id: 0,
            cursor: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.workers.len()
    }

    /// Spawn one worker and return its id.
    pub(crate) fn spawn(&mut self) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let join = tokio::spawn(run_worker(id, self.ctx.clone(), rx));
        self.workers.push(WorkerHandle { id, tx, join });
        metrics::set_worker_count(self.workers.len());
        tracing::info!(worker_id = id, workers = self.workers.len(), "Worker spawned");
        id
    }

    /// Retire the newest worker. The last worker is never retired.
    pub(crate) fn retire(&mut self) -> Option<usize> {
        if self.workers.len() <= 1 {
            return None;
        }
        let handle = self.workers.pop()?;
        self.retired.push((handle.id, handle.join));
        metrics::set_worker_count(self.workers.len());
        tracing::info!(worker_id = handle.id, workers = self.workers.len(), "Worker retired");
        Some(handle.id)
    }

    /// Replace a worker whose channel closed unexpectedly.
    pub(crate) fn replace(&mut self, worker_id: usize) {
        let Some(index) = self.workers.iter().position(|w| w.id == worker_id) else {
            return;
        };
        let handle = self.workers.remove(index);
        self.retired.push((handle.id, handle.join));
        tracing::error!(worker_id, "Worker channel closed, spawning replacement");
        self.spawn();
    }

    /// Grow or shrink one worker at a time until `target` is reached.
    pub(crate) fn resize_to(&mut self, target: usize) {
        let target = target.max(1);
        while self.workers.len() < target {
            self.spawn();
        }
        while self.workers.len() > target {
            if self.retire().is_none() {
                break;
            }
        }
    }

    /// Next worker in round-robin order.
    pub(crate) fn next_sender(&mut self) -> Option<(usize, mpsc::Sender<OrderBatch>)> {
        if self.workers.is_empty() {
            return None;
        }
        let handle = &self.workers[self.cursor % self.workers.len()];
        self.cursor = self.cursor.wrapping_add(1);
        Some((handle.id, handle.tx.clone()))
    }

    /// Close every channel and join every worker, aborting stragglers after
    /// `timeout`.
    pub(crate) async fn shutdown(self, timeout: Duration) -> JoinSummary {
        let Self {
            workers, retired, ..
        } = self;

        let mut joins = retired;
        for handle in workers {
            drop(handle.tx);
            joins.push((handle.id, handle.join));
        }
        metrics::set_worker_count(0);

        let deadline = tokio::time::Instant::now() + timeout;
        let mut summary = JoinSummary::default();
        for (worker_id, mut join) in joins {
            match tokio::time::timeout_at(deadline, &mut join).await {
                Ok(Ok(())) => summary.clean += 1,
                Ok(Err(e)) if e.is_panic() => {
                    tracing::error!(worker_id, "Worker panicked");
                    summary.panicked += 1;
                }
                Ok(Err(_)) => summary.clean += 1,
                Err(_) => {
                    tracing::warn!(worker_id, "Worker did not drain before timeout, aborting");
                    join.abort();
                    summary.timed_out += 1;
                }
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::engine::settings::VenueThrottleSettings;
    use crate::engine::venue::VenueRegistry;
    use crate::resilience::{ResilienceHandler, ResilienceSettings, RetryPolicy};
    use tokio_util::sync::CancellationToken;

    fn pool() -> WorkerPool {
        let (tx, _rx) = mpsc::channel(8);
        let ctx = WorkerContext {
            venues: Arc::new(VenueRegistry::new()),
            resilience: Arc::new(ResilienceHandler::new(
                ResilienceSettings::default(),
                CancellationToken::new(),
            )),
            retry: RetryPolicy::no_retry(),
            throttle: VenueThrottleSettings::default(),
            results: tx,
            cancel: CancellationToken::new(),
        };
        WorkerPool::new(ctx, 4)
    }

    #[tokio::test]
    async fn test_round_robin_assignment() {
        let mut pool = pool();
        pool.resize_to(3);
        let ids: Vec<usize> = (0..6)
            .filter_map(|_| pool.next_sender().map(|(id, _)| id))
            .collect();
        assert_eq!(ids, vec![0, 1, 2, 0, 1, 2]);

        let summary = pool.shutdown(Duration::from_secs(1)).await;
        assert_eq!(summary.clean, 3);
    }

    #[tokio::test]
    async fn test_resize_keeps_one_worker() {
        let mut pool = pool();
        pool.resize_to(4);
        assert_eq!(pool.len(), 4);
        pool.resize_to(0);
        assert_eq!(pool.len(), 1);
        assert!(pool.retire().is_none());

        let summary = pool.shutdown(Duration::from_secs(1)).await;
        assert_eq!(summary.clean + summary.panicked + summary.timed_out, 4);
        assert_eq!(summary.panicked, 0);
    }
}
