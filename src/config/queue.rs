use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Deletion queue configuration.
///
/// ```toml
/// [queue]
/// type = "database"
/// interval_secs = 60
/// items_per_tick = 100
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// Queue backend.
    #[serde(default, rename = "type")]
    pub backend: QueueBackend,

    /// Seconds between queue runner ticks.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Maximum number of items processed per tick.
    #[serde(default = "default_items_per_tick")]
    pub items_per_tick: u32,

    /// Time budget for a single tick, in seconds. The tick stops claiming
    /// new items once this is spent.
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,

    /// How long a claimed item stays invisible to other runners.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,

    /// Seconds a failed item waits before it can be delivered again.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Deliveries after which a failing item is dropped.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::default(),
            interval_secs: default_interval_secs(),
            items_per_tick: default_items_per_tick(),
            max_duration_secs: default_max_duration_secs(),
            lease_secs: default_lease_secs(),
            retry_delay_secs: default_retry_delay_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs == 0 {
            return Err(ConfigError::Validation(
                "queue.interval_secs must be greater than 0".into(),
            ));
        }
        if self.items_per_tick == 0 {
            return Err(ConfigError::Validation(
                "queue.items_per_tick must be greater than 0".into(),
            ));
        }
        if self.max_duration_secs == 0 {
            return Err(ConfigError::Validation(
                "queue.max_duration_secs must be greater than 0".into(),
            ));
        }
        if self.retry_delay_secs == 0 {
            return Err(ConfigError::Validation(
                "queue.retry_delay_secs must be greater than 0".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "queue.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Where queued deletions are held.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum QueueBackend {
    /// Process-local queue; pending items are lost on exit.
    #[default]
    Memory,
    /// `queue_items` table in the configured SQL database.
    #[serde(alias = "sqlite")]
    Database,
}

fn default_interval_secs() -> u64 {
    60
}

fn default_items_per_tick() -> u32 {
    100
}

fn default_max_duration_secs() -> u64 {
    60
}

fn default_lease_secs() -> u64 {
    300 // 5 minutes
}

fn default_retry_delay_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    5
}
