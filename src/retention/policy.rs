use chrono::{DateTime, Utc};
use thiserror::Error;

use super::age::{AgeParseError, RelativeAge};
use crate::config::{BundleRule, RetentionMethod};

/// Why a configured rule cannot be applied. The bundle is left alone.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("keep must be at least 1, got {0}")]
    InvalidKeep(i64),

    #[error("max_age is required when method = \"age\"")]
    MissingMaxAge,

    #[error("invalid max_age '{value}': {source}")]
    InvalidMaxAge {
        value: String,
        #[source]
        source: AgeParseError,
    },
}

/// A validated retention rule, ready for candidate selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Keep the `keep` most recent non-current revisions, delete the rest.
    Count { keep: usize },
    /// Of the non-current revisions older than `max_age`, keep the
    /// `keep - 1` most recent and delete the rest.
    Age { keep: usize, max_age: RelativeAge },
}

impl RetentionPolicy {
    /// Validate a configured rule. Disabled rules are handled by the caller.
    pub fn from_rule(rule: &BundleRule) -> Result<Self, RuleError> {
        let keep = usize::try_from(rule.keep)
            .ok()
            .filter(|keep| *keep >= 1)
            .ok_or(RuleError::InvalidKeep(rule.keep))?;

        match rule.method {
            RetentionMethod::Count => Ok(RetentionPolicy::Count { keep }),
            RetentionMethod::Age => {
                let value = rule.max_age.as_deref().ok_or(RuleError::MissingMaxAge)?;
                let max_age = value.parse().map_err(|source| RuleError::InvalidMaxAge {
                    value: value.to_string(),
                    source,
                })?;
                Ok(RetentionPolicy::Age { keep, max_age })
            }
        }
    }

    /// Number of most recent eligible revisions per entity that are never
    /// candidates. For age rules only revisions past the cutoff are eligible.
    pub fn keep_floor(&self) -> usize {
        match self {
            RetentionPolicy::Count { keep } => *keep,
            RetentionPolicy::Age { keep, .. } => keep.saturating_sub(1),
        }
    }

    /// Revisions modified at or before this instant are old enough to delete.
    ///
    /// `None` for count rules. For age rules whose cutoff is out of range,
    /// the earliest representable instant, so nothing qualifies.
    pub fn age_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            RetentionPolicy::Count { .. } => None,
            RetentionPolicy::Age { max_age, .. } => {
                Some(max_age.cutoff(now).unwrap_or(DateTime::<Utc>::MIN_UTC))
            }
        }
    }

    pub fn method(&self) -> RetentionMethod {
        match self {
            RetentionPolicy::Count { .. } => RetentionMethod::Count,
            RetentionPolicy::Age { .. } => RetentionMethod::Age,
        }
    }
}
