use serde::{Deserialize, Serialize};

/// Periodic work performed by the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Seconds between direct cleanup runs. 0 disables them.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Seconds between full rescans that refill the deletion queue.
    /// 0 disables them.
    #[serde(default)]
    pub rescan_interval_secs: u64,

    /// Re-read retention rules from the config file before every tick.
    #[serde(default = "default_true")]
    pub reload_settings: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_secs: default_cleanup_interval_secs(),
            rescan_interval_secs: 0,
            reload_settings: true,
        }
    }
}

fn default_cleanup_interval_secs() -> u64 {
    3600 // 1 hour
}

fn default_true() -> bool {
    true
}
