//! Global inter-submission throttle.
//!
//! Each submission reserves the next slot `interval` after the previous one
//! under a short lock, then sleeps until that slot with no lock held. The
//! sleep is cancelled by the shutdown token.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::EngineError;

/// Nanosecond-resolution spacing between submissions.
#[derive(Debug)]
pub struct GlobalThrottle {
    interval_ns: AtomicU64,
    min_ns: u64,
    max_ns: u64,
    next_slot: Mutex<Option<Instant>>,
}

impl GlobalThrottle {
    /// Throttle starting at `interval_ns`, adjustable within `[min_ns, max_ns]`.
    #[must_use]
    pub fn new(interval_ns: u64, min_ns: u64, max_ns: u64) -> Self {
        let max_ns = max_ns.max(min_ns);
        Self {
            interval_ns: AtomicU64::new(interval_ns.clamp(min_ns, max_ns)),
            min_ns,
            max_ns,
            next_slot: Mutex::new(None),
        }
    }

    /// Current interval.
    #[must_use]
    pub fn interval_ns(&self) -> u64 {
        self.interval_ns.load(Ordering::Relaxed)
    }

    /// Wait for this caller's slot.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ShuttingDown`] when `shutdown` fires first.
    pub async fn wait(&self, shutdown: &CancellationToken) -> Result<(), EngineError> {
        let interval = Duration::from_nanos(self.interval_ns());
        let now = Instant::now();
        let slot = {
            let mut next = self.next_slot.lock();
            let slot = next.map_or(now, |at| at.max(now));
            *next = Some(slot + interval);
            slot
        };

        if slot <= now {
            return Ok(());
        }
        tokio::select! {
            () = shutdown.cancelled() => Err(EngineError::ShuttingDown),
            () = tokio::time::sleep_until(slot) => Ok(()),
        }
    }

    /// Double the interval (at least +1µs), bounded by the maximum.
    pub fn increase(&self) -> u64 {
        let current = self.interval_ns();
        let next = current
            .saturating_mul(2)
            .max(current.saturating_add(1_000))
            .min(self.max_ns);
        self.interval_ns.store(next, Ordering::Relaxed);
        next
    }

    /// Halve the interval, bounded by the minimum.
    pub fn decrease(&self) -> u64 {
        let next = (self.interval_ns() / 2).max(self.min_ns);
        self.interval_ns.store(next, Ordering::Relaxed);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_submissions_are_spaced() {
        let throttle = GlobalThrottle::new(1_000_000, 0, 10_000_000);
        let token = CancellationToken::new();
        let start = Instant::now();

        for _ in 0..5 {
            throttle.wait(&token).await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_cancelled_by_shutdown() {
        let throttle = GlobalThrottle::new(10_000_000, 0, 10_000_000);
        let token = CancellationToken::new();
        throttle.wait(&token).await.unwrap();

        token.cancel();
        assert_eq!(throttle.wait(&token).await, Err(EngineError::ShuttingDown));
    }

    #[test]
    fn test_adjust_within_bounds() {
        let throttle = GlobalThrottle::new(0, 0, 5_000);
        assert_eq!(throttle.increase(), 1_000);
        assert_eq!(throttle.increase(), 2_000);
        assert_eq!(throttle.increase(), 4_000);
        assert_eq!(throttle.increase(), 5_000);
        assert_eq!(throttle.decrease(), 2_500);
        for _ in 0..20 {
            throttle.decrease();
        }
        assert_eq!(throttle.interval_ns(), 0);
    }
}
