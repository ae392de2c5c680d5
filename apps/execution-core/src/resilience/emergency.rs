//! Process-wide emergency stop.
//!
//! Sticky until an operator resets it. A second trip never overwrites the
//! original reason. The optional callback runs outside the lock; its
//! failures (errors or panics) are logged and swallowed.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

/// Callback invoked once when the stop trips.
pub type EmergencyCallback =
    Arc<dyn Fn(&str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> + Send + Sync>;

/// Serializable view of the emergency stop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyStatus {
    /// Whether the stop is active.
    pub active: bool,
    /// Reason given by the first trip.
    pub reason: Option<String>,
    /// When it tripped.
    pub triggered_at: Option<DateTime<Utc>>,
}

/// Sticky emergency stop flag.
#[derive(Default)]
pub struct EmergencyStop {
    status: Mutex<EmergencyStatus>,
    callback: RwLock<Option<EmergencyCallback>>,
}

impl std::fmt::Debug for EmergencyStop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmergencyStop")
            .field("status", &*self.status.lock())
            .field("has_callback", &self.callback.read().is_some())
            .finish()
    }
}

impl EmergencyStop {
    /// Create an inactive stop.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the trip callback, replacing any previous one.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn(&str) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
            + Send
            + Sync
            + 'static,
    {
        let callback: EmergencyCallback = Arc::new(callback);
        *self.callback.write() = Some(callback);
    }

    /// Trip the stop. Returns `true` if this call tripped it, `false` if it
    /// was already active (the original reason is kept).
    pub fn trigger(&self, reason: &str) -> bool {
        {
            let mut status = self.status.lock();
            if status.active {
                tracing::debug!(
                    original = status.reason.as_deref().unwrap_or_default(),
                    ignored = reason,
                    "Emergency stop already active"
                );
                return false;
            }
            status.active = true;
            status.reason = Some(reason.to_string());
            status.triggered_at = Some(Utc::now());
        }

        tracing::error!(reason, "EMERGENCY STOP TRIGGERED");
        self.fire_callback(reason);
        true
    }

    fn fire_callback(&self, reason: &str) {
        let Some(callback) = self.callback.read().clone() else {
            return;
        };
        match catch_unwind(AssertUnwindSafe(|| callback(reason))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Emergency stop callback failed"),
            Err(_) => tracing::error!("Emergency stop callback panicked"),
        }
    }

    /// Clear the stop. Returns the reason it was tripped with, if any.
    pub fn reset(&self) -> Option<String> {
        let previous = {
            let mut status = self.status.lock();
            let previous = status.reason.take();
            *status = EmergencyStatus::default();
            previous
        };
        if let Some(reason) = &previous {
            tracing::warn!(previous_reason = %reason, "Emergency stop reset");
        }
        previous
    }

    /// Whether the stop is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status.lock().active
    }

    /// Reason, when active.
    #[must_use]
    pub fn active_reason(&self) -> Option<String> {
        let status = self.status.lock();
        if status.active {
            status.reason.clone()
        } else {
            None
        }
    }

    /// Snapshot.
    #[must_use]
    pub fn status(&self) -> EmergencyStatus {
        self.status.lock().clone()
    }
}
