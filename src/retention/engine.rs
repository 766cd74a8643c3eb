//! Direct cleanup: select candidates for every configured bundle and delete
//! them, up to the per-run budget.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use super::{
    selector::{CandidateSelector, candidate_count},
    settings::SettingsProvider,
};
use crate::{
    db::{DbError, DbResult, RevisionRepo},
    models::{DeleteOutcome, EntityId, RevisionId},
    observability::metrics,
};

/// Results from a single cleanup run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupRunResult {
    /// Deletion attempts made, whatever their outcome. Bounded by `cron_limit`.
    pub attempted: u64,
    /// Revisions deleted (or that would have been, in dry-run mode).
    pub deleted: u64,
    /// Revisions that were already gone.
    pub not_found: u64,
    /// Attempts that failed with a store error.
    pub failed: u64,
    /// Attempts refused because the revision had become current.
    pub conflicts: u64,
    /// Bundles whose candidate selection failed and were skipped.
    pub selection_failures: u64,
    /// The run stopped with candidates left over.
    pub budget_exhausted: bool,
    /// Nothing was deleted; deletions were only logged.
    pub dry_run: bool,
    /// Wall time of the run.
    pub duration: Duration,
}

impl CleanupRunResult {
    /// Check if any revisions were deleted.
    pub fn has_deletions(&self) -> bool {
        self.deleted > 0
    }

    /// Check if any attempt or selection failed.
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.selection_failures > 0
    }
}

/// Candidate count for one bundle, as reported by [`RetentionEngine::preview`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundlePreview {
    pub bundle: String,
    pub entities: usize,
    pub revisions: usize,
}

/// Deletes deletion candidates directly, across all bundles with a rule.
pub struct RetentionEngine {
    repo: Arc<dyn RevisionRepo>,
    settings: Arc<dyn SettingsProvider>,
    selector: CandidateSelector,
}

impl RetentionEngine {
    pub fn new(repo: Arc<dyn RevisionRepo>, settings: Arc<dyn SettingsProvider>) -> Self {
        Self {
            selector: CandidateSelector::new(Arc::clone(&repo)),
            repo,
            settings,
        }
    }

    /// Run one cleanup pass.
    ///
    /// Bundles are visited in name order and candidates in selector order.
    /// Every attempt counts against `cron_limit`, including ones that find
    /// the revision gone or fail. A failure never aborts the run.
    pub async fn run_cleanup(&self) -> CleanupRunResult {
        let started = Instant::now();
        let settings = self.settings.settings();
        let limit = u64::from(settings.cron_limit());
        let dry_run = settings.dry_run();

        let mut result = CleanupRunResult {
            dry_run,
            ..Default::default()
        };

        'bundles: for (bundle, policy) in settings.active_policies() {
            let candidates = match self.selector.select(&bundle, &policy, None).await {
                Ok(candidates) => candidates,
                Err(e) => {
                    tracing::error!(
                        bundle = %bundle,
                        error = %e,
                        "Failed to select deletion candidates"
                    );
                    metrics::record_cleanup_error("select");
                    result.selection_failures += 1;
                    continue;
                }
            };

            tracing::debug!(
                bundle = %bundle,
                method = %policy.method(),
                entities = candidates.len(),
                revisions = candidate_count(&candidates),
                "Selected deletion candidates"
            );

            for (entity_id, revision_ids) in candidates {
                for revision_id in revision_ids {
                    if result.attempted >= limit {
                        result.budget_exhausted = true;
                        break 'bundles;
                    }
                    result.attempted += 1;

                    if dry_run {
                        tracing::info!(
                            bundle = %bundle,
                            entity_id,
                            revision_id,
                            "DRY RUN: Would delete revision"
                        );
                        result.deleted += 1;
                        metrics::record_revision_deletion("cleanup", "dry_run");
                        continue;
                    }

                    self.delete_one(&mut result, entity_id, revision_id).await;
                }
            }
        }

        result.duration = started.elapsed();
        metrics::record_run_duration("cleanup", result.duration.as_secs_f64());
        result
    }

    async fn delete_one(
        &self,
        result: &mut CleanupRunResult,
        entity_id: EntityId,
        revision_id: RevisionId,
    ) {
        match self.repo.delete_revision(revision_id).await {
            Ok(DeleteOutcome::Deleted) => {
                tracing::debug!(entity_id, revision_id, "Deleted revision");
                result.deleted += 1;
                metrics::record_revision_deletion("cleanup", "deleted");
            }
            Ok(DeleteOutcome::NotFound) => {
                tracing::debug!(entity_id, revision_id, "Revision already deleted");
                result.not_found += 1;
                metrics::record_revision_deletion("cleanup", "not_found");
            }
            Err(DbError::CurrentRevision { .. }) => {
                tracing::warn!(
                    entity_id,
                    revision_id,
                    "Revision became current since selection, not deleting"
                );
                result.conflicts += 1;
                metrics::record_revision_deletion("cleanup", "conflict");
            }
            Err(e) => {
                tracing::error!(entity_id, revision_id, error = %e, "Failed to delete revision");
                result.failed += 1;
                metrics::record_revision_deletion("cleanup", "failed");
            }
        }
    }

    /// Count current candidates per bundle without deleting anything.
    ///
    /// Only bundles with an enabled and valid rule are listed.
    pub async fn preview(&self, bundle: Option<&str>) -> DbResult<Vec<BundlePreview>> {
        let settings = self.settings.settings();
        let mut previews = Vec::new();

        for (name, policy) in settings.active_policies() {
            if bundle.is_some_and(|b| b != name) {
                continue;
            }
            let candidates = self.selector.select(&name, &policy, None).await?;
            previews.push(BundlePreview {
                entities: candidates.len(),
                revisions: candidate_count(&candidates),
                bundle: name,
            });
        }

        Ok(previews)
    }
}
