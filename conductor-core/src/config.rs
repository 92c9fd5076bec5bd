//! Static YAML configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.conductor/
//!   targets.yaml    (scheduler settings + sync target definitions)
//! ```
//!
//! # API pattern
//!
//! Every loader has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! The raw serde structs are converted into validated [`SyncTarget`]s by
//! [`ConductorConfig::sync_targets`]; nothing downstream sees unvalidated input.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::graph::{EligibilityPolicy, DEFAULT_STALENESS_FACTOR};
use crate::registry::TargetRegistry;
use crate::types::{PriorityTier, SyncTarget, TargetKey};

pub const CONFIG_FILE: &str = "targets.yaml";

/// Upper bound for `interval_secs` and `timeout_secs`: 365 days.
pub const MAX_TARGET_SECS: u64 = 365 * 24 * 60 * 60;

// ---------------------------------------------------------------------------
// 1. Raw configuration
// ---------------------------------------------------------------------------

/// Root of `targets.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ConductorConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub conflicts: ConflictConfig,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Worker pool size for each of the MEDIUM and LOW tiers.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    #[serde(default = "default_staleness_factor")]
    pub staleness_factor: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            worker_pool_size: default_worker_pool_size(),
            staleness_factor: default_staleness_factor(),
        }
    }
}

impl SchedulerConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    pub fn eligibility_policy(&self) -> EligibilityPolicy {
        EligibilityPolicy {
            staleness_factor: self.staleness_factor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictConfig {
    /// Duplicates whose `updated_at` differ by more than this are timestamp conflicts.
    #[serde(default = "default_timestamp_skew_secs")]
    pub timestamp_skew_secs: u64,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            timestamp_skew_secs: default_timestamp_skew_secs(),
        }
    }
}

impl ConflictConfig {
    pub fn timestamp_skew(&self) -> Duration {
        Duration::from_secs(self.timestamp_skew_secs)
    }
}

/// One target entry as written in YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub platform: String,
    pub data_type: String,
    pub priority: PriorityTier,
    pub interval_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default)]
    pub retry_budget: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Prerequisites as `platform/data_type` strings.
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default = "default_true")]
    pub conflict_resolution: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector: Option<ConnectorConfig>,
}

/// External program that performs the actual sync for a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub command: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_tick_secs() -> u64 {
    30
}
fn default_worker_pool_size() -> usize {
    3
}
fn default_staleness_factor() -> f64 {
    DEFAULT_STALENESS_FACTOR
}
fn default_timestamp_skew_secs() -> u64 {
    300
}
fn default_batch_size() -> u32 {
    100
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// 2. Validation
// ---------------------------------------------------------------------------

impl TargetConfig {
    pub fn key(&self) -> TargetKey {
        TargetKey::new(self.platform.trim(), self.data_type.trim())
    }

    /// Convert into a validated [`SyncTarget`].
    pub fn to_sync_target(&self) -> Result<SyncTarget, ConfigError> {
        let key = self.key();
        let invalid = |reason: &str| ConfigError::InvalidTarget {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        if key.platform.0.is_empty() || key.data_type.0.is_empty() {
            return Err(invalid("platform and data_type must be non-empty"));
        }
        if key.platform.0.contains('/') || key.data_type.0.contains('/') {
            return Err(invalid("platform and data_type must not contain '/'"));
        }
        if self.interval_secs == 0 {
            return Err(invalid("interval_secs must be greater than zero"));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size must be greater than zero"));
        }
        if self.timeout_secs == 0 {
            return Err(invalid("timeout_secs must be greater than zero"));
        }
        if self.interval_secs > MAX_TARGET_SECS {
            return Err(invalid(&format!(
                "interval_secs must be at most {MAX_TARGET_SECS}"
            )));
        }
        if self.timeout_secs > MAX_TARGET_SECS {
            return Err(invalid(&format!(
                "timeout_secs must be at most {MAX_TARGET_SECS}"
            )));
        }

        let depends_on = self
            .depends_on
            .iter()
            .map(|raw| raw.parse::<TargetKey>())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SyncTarget {
            key,
            priority: self.priority,
            interval: Duration::from_secs(self.interval_secs),
            batch_size: self.batch_size,
            retry_budget: self.retry_budget,
            timeout: Duration::from_secs(self.timeout_secs),
            depends_on,
            conflict_resolution: self.conflict_resolution,
        })
    }
}

impl ConductorConfig {
    /// Check scheduler/conflict settings.
    pub fn validate_settings(&self) -> Result<(), ConfigError> {
        if self.scheduler.tick_secs == 0 {
            return Err(ConfigError::InvalidSetting {
                name: "scheduler.tick_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.scheduler.worker_pool_size == 0 {
            return Err(ConfigError::InvalidSetting {
                name: "scheduler.worker_pool_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        let factor = self.scheduler.staleness_factor;
        if !factor.is_finite() || factor < 1.0 || factor > 100.0 {
            return Err(ConfigError::InvalidSetting {
                name: "scheduler.staleness_factor",
                reason: format!("{factor} is outside 1.0..=100.0"),
            });
        }
        Ok(())
    }

    /// All target entries as validated [`SyncTarget`]s, in file order.
    pub fn sync_targets(&self) -> Result<Vec<SyncTarget>, ConfigError> {
        self.targets.iter().map(TargetConfig::to_sync_target).collect()
    }

    /// Validate settings and targets, and register the targets.
    pub fn build_registry(&self) -> Result<TargetRegistry, ConfigError> {
        self.validate_settings()?;
        TargetRegistry::new(self.sync_targets()?)
    }
}

// ---------------------------------------------------------------------------
// 3. Load
// ---------------------------------------------------------------------------

/// `<home>/.conductor/targets.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    home.join(".conductor").join(CONFIG_FILE)
}

/// `config_path_at` convenience wrapper.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    Ok(config_path_at(&home()?))
}

/// Load a config file from an explicit path.
///
/// Returns `ConfigError::ConfigNotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_from(path: &Path) -> Result<ConductorConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::ConfigNotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path)?;
    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load `<home>/.conductor/targets.yaml`.
pub fn load_at(home: &Path) -> Result<ConductorConfig, ConfigError> {
    load_from(&config_path_at(home))
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<ConductorConfig, ConfigError> {
    load_at(&home()?)
}

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
