//! Revision retention configuration.
//!
//! Rules are declared per bundle. A bundle without a table, or with
//! `enabled = false`, is never pruned.
//!
//! # Example
//!
//! ```toml
//! [retention]
//! cron_limit = 50
//! dry_run = false
//!
//! [retention.bundles.article]
//! method = "count"
//! keep = 5
//!
//! [retention.bundles.page]
//! method = "age"
//! keep = 3
//! max_age = "2 weeks"
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Deletion cap applied when `cron_limit` is unset or zero.
pub const DEFAULT_CRON_LIMIT: u32 = 50;

/// Revisions kept when a rule does not say otherwise.
pub const DEFAULT_KEEP: i64 = 3;

/// Revision retention configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct RetentionConfig {
    /// Maximum number of deletion attempts per cleanup run, across all bundles.
    /// 0 means the default of 50.
    #[serde(default = "default_cron_limit")]
    pub cron_limit: u32,

    /// Log what would be deleted without deleting anything.
    #[serde(default)]
    pub dry_run: bool,

    /// Per-bundle rules, keyed by bundle name.
    #[serde(default)]
    pub bundles: BTreeMap<String, BundleRule>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            cron_limit: default_cron_limit(),
            dry_run: false,
            bundles: BTreeMap::new(),
        }
    }
}

fn default_cron_limit() -> u32 {
    DEFAULT_CRON_LIMIT
}

/// Retention rule for a single bundle.
///
/// Fields are kept loose here (`keep` is signed, `max_age` is free text) so
/// a bad rule disables only its bundle instead of failing the whole file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct BundleRule {
    /// Whether the rule is active. A disabled rule behaves like no rule.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How candidates are chosen.
    pub method: RetentionMethod,

    /// Keep floor. With `count`, the number of most recent non-current
    /// revisions kept. With `age`, one less than this many of the revisions
    /// older than `max_age` are kept. Must be at least 1.
    #[serde(default = "default_keep")]
    pub keep: i64,

    /// Relative age past which revisions become deletable, e.g. "2 weeks".
    /// Required when `method = "age"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<String>,
}

impl BundleRule {
    pub fn count(keep: i64) -> Self {
        Self {
            enabled: true,
            method: RetentionMethod::Count,
            keep,
            max_age: None,
        }
    }

    pub fn age(keep: i64, max_age: impl Into<String>) -> Self {
        Self {
            enabled: true,
            method: RetentionMethod::Age,
            keep,
            max_age: Some(max_age.into()),
        }
    }
}

/// Candidate selection method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum RetentionMethod {
    /// Keep the N most recent non-current revisions.
    Count,
    /// Delete revisions older than `max_age`, above the keep floor.
    Age,
}

impl std::fmt::Display for RetentionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetentionMethod::Count => write!(f, "count"),
            RetentionMethod::Age => write!(f, "age"),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_keep() -> i64 {
    DEFAULT_KEEP
}
