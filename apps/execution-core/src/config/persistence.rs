//! State persistence configuration.

use serde::{Deserialize, Serialize};

/// State persistence configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Enable state persistence.
    #[serde(default = "default_persistence_enabled")]
    pub enabled: bool,
    /// Snapshot file path.
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,
    /// Snapshot interval in seconds (how often to persist state).
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval_secs: u64,
    /// Error and recovery records kept in each snapshot.
    #[serde(default = "default_history_in_snapshot")]
    pub history_in_snapshot: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: default_persistence_enabled(),
            snapshot_path: default_snapshot_path(),
            snapshot_interval_secs: default_snapshot_interval(),
            history_in_snapshot: default_history_in_snapshot(),
        }
    }
}

const fn default_persistence_enabled() -> bool {
    true
}

fn default_snapshot_path() -> String {
    "./data/state.json".to_string()
}

const fn default_snapshot_interval() -> u64 {
    60
}

const fn default_history_in_snapshot() -> usize {
    100
}
