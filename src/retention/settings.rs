use std::{collections::BTreeMap, path::Path, sync::Arc};

use parking_lot::RwLock;

use super::policy::{RetentionPolicy, RuleError};
use crate::config::{
    BundleRule, ConfigError, DEFAULT_CRON_LIMIT, PrunerConfig, RetentionConfig,
};

/// Snapshot of the retention rules and run limits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionSettings {
    rules: BTreeMap<String, BundleRule>,
    cron_limit: u32,
    dry_run: bool,
}

impl RetentionSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &RetentionConfig) -> Self {
        Self {
            rules: config.bundles.clone(),
            cron_limit: config.cron_limit,
            dry_run: config.dry_run,
        }
    }

    pub fn with_rule(mut self, bundle: impl Into<String>, rule: BundleRule) -> Self {
        self.rules.insert(bundle.into(), rule);
        self
    }

    pub fn with_cron_limit(mut self, cron_limit: u32) -> Self {
        self.cron_limit = cron_limit;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Maximum deletion attempts per cleanup run. Zero means the default.
    pub fn cron_limit(&self) -> u32 {
        if self.cron_limit == 0 {
            DEFAULT_CRON_LIMIT
        } else {
            self.cron_limit
        }
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// The configured rule for `bundle`, enabled or not.
    pub fn rule(&self, bundle: &str) -> Option<&BundleRule> {
        self.rules.get(bundle)
    }

    /// The policy to apply to `bundle`, if it has an enabled and valid rule.
    ///
    /// An invalid rule is logged and treated as absent.
    pub fn policy_for(&self, bundle: &str) -> Option<RetentionPolicy> {
        let rule = self.rules.get(bundle).filter(|rule| rule.enabled)?;
        match RetentionPolicy::from_rule(rule) {
            Ok(policy) => Some(policy),
            Err(error) => {
                tracing::warn!(bundle, error = %error, "Ignoring invalid retention rule");
                None
            }
        }
    }

    /// Every bundle with an enabled and valid rule, in bundle name order.
    ///
    /// Invalid rules are logged once per call and skipped.
    pub fn active_policies(&self) -> Vec<(String, RetentionPolicy)> {
        self.rules
            .keys()
            .filter_map(|bundle| {
                self.policy_for(bundle)
                    .map(|policy| (bundle.clone(), policy))
            })
            .collect()
    }

    /// Enabled rules that fail validation, in bundle name order.
    pub fn validation_errors(&self) -> Vec<(String, RuleError)> {
        self.rules
            .iter()
            .filter(|(_, rule)| rule.enabled)
            .filter_map(|(bundle, rule)| {
                RetentionPolicy::from_rule(rule)
                    .err()
                    .map(|error| (bundle.clone(), error))
            })
            .collect()
    }
}

/// Source of the retention settings currently in force.
///
/// Consumers call `settings()` at the start of each operation and keep the
/// snapshot for its duration.
pub trait SettingsProvider: Send + Sync {
    fn settings(&self) -> Arc<RetentionSettings>;
}

/// Settings held in memory and swappable at runtime.
#[derive(Debug, Default)]
pub struct SharedSettings {
    current: RwLock<Arc<RetentionSettings>>,
}

impl SharedSettings {
    pub fn new(settings: RetentionSettings) -> Self {
        Self {
            current: RwLock::new(Arc::new(settings)),
        }
    }

    /// Replace the settings seen by subsequent `settings()` calls.
    pub fn replace(&self, settings: RetentionSettings) {
        *self.current.write() = Arc::new(settings);
    }

    /// Re-read the `[retention]` section of a config file.
    ///
    /// On error the current settings stay in force.
    pub fn reload_from_file(&self, path: impl AsRef<Path>) -> Result<bool, ConfigError> {
        let config = PrunerConfig::from_file(path)?;
        let next = RetentionSettings::from_config(&config.retention);

        let mut current = self.current.write();
        if **current == next {
            return Ok(false);
        }
        *current = Arc::new(next);
        Ok(true)
    }
}

impl SettingsProvider for SharedSettings {
    fn settings(&self) -> Arc<RetentionSettings> {
        Arc::clone(&self.current.read())
    }
}
