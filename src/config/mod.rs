//! Configuration module for the revision pruner.
//!
//! The pruner is configured via a TOML file, with support for environment
//! variable interpolation using `${VAR_NAME}` syntax.
//!
//! # Example
//!
//! ```toml
//! [database]
//! type = "sqlite"
//! path = "${CONTENT_DB}"
//!
//! [retention.bundles.article]
//! method = "count"
//! keep = 5
//!
//! [queue]
//! type = "database"
//! ```

mod database;
mod observability;
mod queue;
mod retention;
mod scheduler;

use std::path::Path;

pub use database::*;
pub use observability::*;
pub use queue::*;
pub use retention::*;
pub use scheduler::*;
use serde::{Deserialize, Serialize};

/// Root configuration for the revision pruner.
///
/// All sections are optional. An empty file is valid but prunes nothing
/// and has no store to prune.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct PrunerConfig {
    /// Revision store the retention rules are applied to.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Per-bundle retention rules and the per-run deletion cap.
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Deferred deletion queue.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Periodic cleanup and rescan driven by `daemon`.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Logging and metrics.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl PrunerConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing required variables will cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;

        // Catch feature-gated values before serde reports them as unknown variants
        let raw: toml::Value = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        check_disabled_features(&raw)?;

        let config: PrunerConfig = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration for consistency.
    ///
    /// Invalid retention rules are not errors here: they disable their
    /// bundle and are reported by `RetentionSettings::validation_errors`.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.backend == QueueBackend::Database && !self.database.is_sql() {
            return Err(ConfigError::Validation(
                "queue.type = \"database\" requires an SQL database (database.type = \"sqlite\")"
                    .into(),
            ));
        }

        self.database.validate()?;
        self.queue.validate()?;

        Ok(())
    }

    /// Generate the JSON schema for the configuration.
    #[cfg(feature = "json-schema")]
    pub fn json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(PrunerConfig)
    }

    /// Generate the JSON schema as a pretty-printed JSON string.
    #[cfg(feature = "json-schema")]
    pub fn json_schema_string() -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::json_schema())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Check for feature-gated configuration values before typed deserialization,
/// so the error names the cargo feature to enable.
fn check_disabled_features(raw: &toml::Value) -> Result<(), ConfigError> {
    let mut issues: Vec<(String, &str)> = Vec::new();

    if let Some(type_val) = raw
        .get("database")
        .and_then(|v| v.get("type"))
        .and_then(|v| v.as_str())
    {
        check_database_feature(type_val, &mut issues);
    }

    if raw
        .get("observability")
        .and_then(|v| v.get("metrics"))
        .and_then(|v| v.get("enabled"))
        .and_then(|v| v.as_bool())
        == Some(true)
    {
        check_metrics_feature(&mut issues);
    }

    if issues.is_empty() {
        return Ok(());
    }

    let details = issues
        .iter()
        .map(|(msg, _)| msg.as_str())
        .collect::<Vec<_>>()
        .join("\n  - ");
    let features = issues
        .iter()
        .map(|(_, feat)| *feat)
        .collect::<Vec<_>>()
        .join(",");

    Err(ConfigError::Validation(format!(
        "Configuration requires features not compiled in this build:\n  \
         - {details}\n\n\
         Rebuild with: cargo build --features {features}"
    )))
}

fn check_database_feature(type_val: &str, _issues: &mut Vec<(String, &str)>) {
    match type_val {
        #[cfg(not(feature = "database-sqlite"))]
        "sqlite" => _issues.push((
            "database type 'sqlite' requires the 'database-sqlite' feature".into(),
            "database-sqlite",
        )),
        _ => {}
    }
}

fn check_metrics_feature(_issues: &mut Vec<(String, &str)>) {
    #[cfg(not(feature = "prometheus"))]
    _issues.push((
        "observability.metrics.enabled requires the 'prometheus' feature".into(),
        "prometheus",
    ));
}

/// Expand environment variables in the format `${VAR_NAME}`.
/// Variables after a `#` on the same line are left untouched.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| ConfigError::Validation(format!("invalid interpolation pattern: {e}")))?;
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');
        let mut last_end = 0;

        for cap in re.captures_iter(line) {
            let Some(whole) = cap.get(0) else {
                continue;
            };

            if let Some(pos) = comment_pos
                && whole.start() >= pos
            {
                continue;
            }

            result.push_str(&line[last_end..whole.start()]);

            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            result.push_str(&value);

            last_end = whole.end();
        }

        result.push_str(&line[last_end..]);
        result.push('\n');
    }

    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}
