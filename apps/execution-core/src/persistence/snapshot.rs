use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::resilience::{ErrorRecord, RecoveryRecord, ResilienceHandler};
use crate::risk::{RiskManager, RiskStateSnapshot};

/// Snapshot format version. Snapshots with another version are ignored.
pub const SNAPSHOT_VERSION: u32 = 1;

// ============================================================================
// Errors
// ============================================================================

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Filesystem error.
    #[error("I/O error on '{path}': {source}")]
    Io {
        /// File involved.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Snapshot written by an incompatible version.
    #[error("Unsupported snapshot version {found} (expected {expected})")]
    Version {
        /// Version in the file.
        found: u32,
        /// Version this build writes.
        expected: u32,
    },
}

impl PersistenceError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Everything persisted across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Format version.
    pub version: u32,
    /// When the snapshot was taken.
    pub saved_at: DateTime<Utc>,
    /// Risk gate counters and alerts.
    pub risk: RiskStateSnapshot,
    /// Latest error records, oldest first.
    #[serde(default)]
    pub errors: Vec<ErrorRecord>,
    /// Latest recovery records, oldest first.
    #[serde(default)]
    pub recoveries: Vec<RecoveryRecord>,
}

impl StateSnapshot {
    /// Capture current state, keeping the last `history` records of each kind.
    #[must_use]
    pub fn capture(risk: &RiskManager, resilience: &ResilienceHandler, history: usize) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            risk: risk.snapshot(),
            errors: resilience.recent_errors(history),
            recoveries: resilience.recent_recoveries(history),
        }
    }

    /// Reapply into live components.
    pub fn apply(self, risk: &RiskManager, resilience: &ResilienceHandler) {
        risk.restore(self.risk);
        resilience.restore_history(self.errors, self.recoveries);
    }
}

/// JSON snapshot file.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    /// Store backed by `path`. Nothing is touched until the first save.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Snapshot file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Write the snapshot atomically: temp file, then rename over the target.
    pub fn save(&self, snapshot: &StateSnapshot) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
        }

        let json = serde_json::to_string_pretty(snapshot)?;
        let tmp_path = self.tmp_path();
        fs::write(&tmp_path, json).map_err(|e| PersistenceError::io(&tmp_path, e))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| PersistenceError::io(&self.path, e))?;

        tracing::debug!(
            path = %self.path.display(),
            errors = snapshot.errors.len(),
            mode = %snapshot.risk.state.trading_mode,
            "State snapshot saved"
        );
        Ok(())
    }

    /// Read the snapshot. `Ok(None)` when no file exists.
    pub fn try_load(&self) -> Result<Option<StateSnapshot>, PersistenceError> {
        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PersistenceError::io(&self.path, e)),
        };

        let snapshot: StateSnapshot = serde_json::from_str(&json)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(PersistenceError::Version {
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        Ok(Some(snapshot))
    }

    /// Best-effort load: unreadable or corrupt snapshots are logged and
    /// treated as absent.
    #[must_use]
    pub fn load(&self) -> Option<StateSnapshot> {
        match self.try_load() {
            Ok(Some(snapshot)) => {
                tracing::info!(
                    path = %self.path.display(),
                    saved_at = %snapshot.saved_at,
                    "Loaded state snapshot"
                );
                Some(snapshot)
            }
            Ok(None) => {
                tracing::info!(path = %self.path.display(), "No state snapshot found");
                None
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Ignoring unreadable state snapshot"
                );
                None
            }
        }
    }
}

/// Save a snapshot every `interval` until cancelled.
pub async fn run_snapshot_loop(
    store: SnapshotStore,
    risk: Arc<RiskManager>,
    resilience: Arc<ResilienceHandler>,
    interval: Duration,
    history: usize,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let snapshot = StateSnapshot::capture(&risk, &resilience, history);
                if let Err(e) = store.save(&snapshot) {
                    tracing::warn!(error = %e, "Periodic state snapshot failed");
                }
            }
        }
    }
    tracing::debug!("Snapshot loop stopped");
}
