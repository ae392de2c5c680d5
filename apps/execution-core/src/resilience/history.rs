//! Bounded error and recovery history.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::circuit_breaker::CircuitBreakerMetrics;
use super::taxonomy::ErrorType;

/// Default history capacity.
pub const DEFAULT_HISTORY_CAP: usize = 1000;

/// Length the history is trimmed back to once the capacity is exceeded.
pub const DEFAULT_HISTORY_TRIM: usize = 500;

/// One recorded failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// When the failure was observed.
    pub timestamp: DateTime<Utc>,
    /// Canonical type.
    pub error_type: ErrorType,
    /// Error message.
    pub message: String,
    /// Operation that failed.
    pub operation: String,
    /// Retries already spent when this failure happened.
    pub retry_count: u32,
    /// Set once a later attempt of the same operation succeeded.
    #[serde(default)]
    pub resolved: bool,
    /// Structured payload.
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

impl ErrorRecord {
    /// Create an unresolved record stamped now.
    #[must_use]
    pub fn new(
        error_type: ErrorType,
        message: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            error_type,
            message: message.into(),
            operation: operation.into(),
            retry_count: 0,
            resolved: false,
            details: BTreeMap::new(),
        }
    }

    /// Set the retry count.
    #[must_use]
    pub const fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Attach structured details.
    #[must_use]
    pub fn with_details(mut self, details: BTreeMap<String, String>) -> Self {
        self.details.extend(details);
        self
    }
}

/// An operation that succeeded after one or more retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryRecord {
    /// When the operation recovered.
    pub timestamp: DateTime<Utc>,
    /// Operation name.
    pub operation: String,
    /// Total attempts including the successful one.
    pub attempts: u32,
}

/// Append-only ring that trims to `trim_to` entries when `cap` is exceeded.
#[derive(Debug, Clone)]
pub struct BoundedHistory<T> {
    entries: VecDeque<T>,
    cap: usize,
    trim_to: usize,
}

impl<T: Clone> BoundedHistory<T> {
    /// Create an empty history.
    #[must_use]
    pub fn new(cap: usize, trim_to: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            cap: cap.max(1),
            trim_to: trim_to.min(cap),
        }
    }

    /// Append an entry, trimming the oldest on overflow.
    pub fn push(&mut self, entry: T) {
        self.entries.push_back(entry);
        if self.entries.len() > self.cap {
            let excess = self.entries.len() - self.trim_to;
            self.entries.drain(..excess);
        }
    }

    /// Number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.entries.iter()
    }

    /// Mutable iteration, oldest to newest.
    pub fn iter_mut(&mut self) -> impl DoubleEndedIterator<Item = &mut T> {
        self.entries.iter_mut()
    }

    /// The newest `n` entries, oldest first.
    #[must_use]
    pub fn tail(&self, n: usize) -> Vec<T> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Aggregate view of the error history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorStats {
    /// Records currently retained.
    pub total_errors: usize,
    /// Unresolved records.
    pub unresolved: usize,
    /// Count per canonical type.
    pub by_type: BTreeMap<ErrorType, usize>,
    /// Count per operation.
    pub by_operation: BTreeMap<String, usize>,
    /// Operations recovered after retries.
    pub recoveries: usize,
    /// Consecutive exhausted retry sequences.
    pub consecutive_failures: u32,
    /// Emergency stop state.
    pub emergency_stop_active: bool,
    /// Emergency stop reason.
    pub emergency_stop_reason: Option<String>,
    /// Most recent records (newest last).
    pub recent: Vec<ErrorRecord>,
    /// Named breaker snapshots.
    #[serde(default)]
    pub circuit_breakers: Vec<CircuitBreakerMetrics>,
}

impl ErrorStats {
    /// Summarise a history.
    #[must_use]
    pub fn from_history(history: &BoundedHistory<ErrorRecord>, recent: usize) -> Self {
        let mut stats = Self {
            total_errors: history.len(),
            recent: history.tail(recent),
            ..Self::default()
        };
        for record in history.iter() {
            if !record.resolved {
                stats.unresolved += 1;
            }
            *stats.by_type.entry(record.error_type).or_default() += 1;
            *stats
                .by_operation
                .entry(record.operation.clone())
                .or_default() += 1;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_record_json_roundtrip_is_exact() {
        let record = ErrorRecord::new(ErrorType::Timeout, "venue slow", "venue:alpha")
            .with_retry_count(2)
            .with_details(BTreeMap::from([("attempt".to_string(), "3".to_string())]));

        let json = serde_json::to_string(&record).unwrap();
        let restored: ErrorRecord = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.timestamp, record.timestamp);
        assert_eq!(restored.error_type, record.error_type);
        assert_eq!(restored.message, record.message);
        assert_eq!(restored.retry_count, record.retry_count);
        assert_eq!(restored, record);
    }

    #[test]
    fn test_history_trims_to_target_on_overflow() {
        let mut history = BoundedHistory::new(DEFAULT_HISTORY_CAP, DEFAULT_HISTORY_TRIM);
        for i in 0..DEFAULT_HISTORY_CAP {
            history.push(i);
        }
        assert_eq!(history.len(), DEFAULT_HISTORY_CAP);

        history.push(DEFAULT_HISTORY_CAP);
        assert_eq!(history.len(), DEFAULT_HISTORY_TRIM);
        // Newest entries survive.
        assert_eq!(history.iter().last(), Some(&DEFAULT_HISTORY_CAP));
        assert_eq!(history.iter().next(), Some(&(DEFAULT_HISTORY_CAP + 1 - DEFAULT_HISTORY_TRIM)));
    }

    #[test]
    fn test_tail() {
        let mut history = BoundedHistory::new(10, 5);
        for i in 0..4 {
            history.push(i);
        }
        assert_eq!(history.tail(2), vec![2, 3]);
        assert_eq!(history.tail(10), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_stats_counts() {
        let mut history = BoundedHistory::new(10, 5);
        history.push(ErrorRecord::new(ErrorType::Network, "a", "op1"));
        history.push(ErrorRecord::new(ErrorType::Network, "b", "op2"));
        let mut resolved = ErrorRecord::new(ErrorType::Timeout, "c", "op1");
        resolved.resolved = true;
        history.push(resolved);

        let stats = ErrorStats::from_history(&history, 2);
        assert_eq!(stats.total_errors, 3);
        assert_eq!(stats.unresolved, 2);
        assert_eq!(stats.by_type[&ErrorType::Network], 2);
        assert_eq!(stats.by_operation["op1"], 2);
        assert_eq!(stats.recent.len(), 2);
    }
}
