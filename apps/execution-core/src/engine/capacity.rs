//! License-derived cap on concurrently active engine instances.
//!
//! An engine registers here before it dispatches for real. An instance
//! that cannot register runs in ghost mode: it accepts submissions and
//! returns synthetic identifiers without dispatching.

use std::collections::BTreeSet;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Capacity errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapacityError {
    /// Every licensed slot is taken.
    #[error("capacity reached: {active}/{max} instances active")]
    AtCapacity {
        /// Active instances.
        active: usize,
        /// Licensed maximum.
        max: usize,
    },

    /// The license key could not be parsed.
    #[error("invalid license key: {reason}")]
    InvalidLicense {
        /// What was wrong.
        reason: String,
    },
}

/// License tiers and the instance counts they grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LicenseTier {
    /// No key supplied.
    Community,
    /// `PRO-...` keys.
    Professional,
    /// `ENT-...` keys.
    Enterprise,
}

impl LicenseTier {
    /// Instances granted by the tier.
    #[must_use]
    pub const fn max_instances(self) -> usize {
        match self {
            Self::Community => 1,
            Self::Professional => 4,
            Self::Enterprise => 32,
        }
    }

    /// Parse a license key of the form `<TIER>-<id>`.
    ///
    /// # Errors
    ///
    /// Returns [`CapacityError::InvalidLicense`] for an unknown prefix or a
    /// missing id.
    pub fn from_license_key(key: Option<&str>) -> Result<Self, CapacityError> {
        let Some(key) = key.map(str::trim).filter(|k| !k.is_empty()) else {
            return Ok(Self::Community);
        };
        let (prefix, id) = key.split_once('-').ok_or_else(|| CapacityError::InvalidLicense {
            reason: "expected <TIER>-<id>".to_string(),
        })?;
        if id.trim().is_empty() {
            return Err(CapacityError::InvalidLicense {
                reason: "license id is empty".to_string(),
            });
        }
        match prefix.to_ascii_uppercase().as_str() {
            "COM" | "COMMUNITY" => Ok(Self::Community),
            "PRO" | "PROFESSIONAL" => Ok(Self::Professional),
            "ENT" | "ENTERPRISE" => Ok(Self::Enterprise),
            other => Err(CapacityError::InvalidLicense {
                reason: format!("unknown tier {other}"),
            }),
        }
    }
}

/// Capacity settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacitySettings {
    /// License key; `None` means the community tier.
    pub license_key: Option<String>,
    /// Lower the licensed maximum (never raises it).
    pub max_instances_override: Option<usize>,
}

/// Capacity snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityStatus {
    /// Licensed tier (`None` if the key was invalid).
    pub tier: Option<LicenseTier>,
    /// Instances allowed.
    pub max_instances: usize,
    /// Registered instance ids.
    pub active: Vec<String>,
}

/// Tracks which instances hold a licensed slot.
#[derive(Debug)]
pub struct CapacityManager {
    tier: Option<LicenseTier>,
    max_instances: usize,
    active: Mutex<BTreeSet<String>>,
}

impl CapacityManager {
    /// Build from settings. An invalid key yields zero slots.
    #[must_use]
    pub fn new(settings: &CapacitySettings) -> Self {
        let tier = match LicenseTier::from_license_key(settings.license_key.as_deref()) {
            Ok(tier) => Some(tier),
            Err(e) => {
                tracing::warn!(error = %e, "License rejected; all instances will run in ghost mode");
                None
            }
        };
        let licensed = tier.map_or(0, LicenseTier::max_instances);
        let max_instances = settings
            .max_instances_override
            .map_or(licensed, |cap| cap.min(licensed));

        Self {
            tier,
            max_instances,
            active: Mutex::new(BTreeSet::new()),
        }
    }

    /// Claim a slot for `instance_id`. Registering twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CapacityError::AtCapacity`] when no slot is free.
    pub fn register(&self, instance_id: &str) -> Result<(), CapacityError> {
        let mut active = self.active.lock();
        if active.contains(instance_id) {
            return Ok(());
        }
        if active.len() >= self.max_instances {
            return Err(CapacityError::AtCapacity {
                active: active.len(),
                max: self.max_instances,
            });
        }
        active.insert(instance_id.to_string());
        tracing::info!(
            instance_id,
            active = active.len(),
            max = self.max_instances,
            "Engine instance registered"
        );
        Ok(())
    }

    /// Release a slot. Returns whether the instance held one.
    pub fn release(&self, instance_id: &str) -> bool {
        self.active.lock().remove(instance_id)
    }

    /// Whether `instance_id` holds a slot.
    #[must_use]
    pub fn is_registered(&self, instance_id: &str) -> bool {
        self.active.lock().contains(instance_id)
    }

    /// Licensed maximum.
    #[must_use]
    pub const fn max_instances(&self) -> usize {
        self.max_instances
    }

    /// Snapshot.
    #[must_use]
    pub fn status(&self) -> CapacityStatus {
        CapacityStatus {
            tier: self.tier,
            max_instances: self.max_instances,
            active: self.active.lock().iter().cloned().collect(),
        }
    }
}
