use std::sync::Arc;

use super::{
    selector::{CandidateSelector, CandidateSet},
    settings::SettingsProvider,
};
use crate::{
    db::RevisionRepo,
    models::Entity,
    observability::metrics,
    queue::{QueueItem, QueueResult, WorkQueue},
};

/// Producer name under which revision deletions are queued.
pub const REVISION_DELETE_PRODUCER: &str = "revision_delete";

/// Outcome of an enqueue operation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EnqueueResult {
    /// Items pushed onto the queue.
    pub enqueued: u64,
    /// Items that could not be pushed.
    pub failed: u64,
    /// Pending items discarded before a full rescan.
    pub cleared: u64,
    /// Bundles whose candidate selection failed.
    pub selection_failures: u64,
}

/// Turns deletion candidates into queue items for the queue runner.
pub struct DeletionQueueBridge {
    queue: Arc<dyn WorkQueue>,
    settings: Arc<dyn SettingsProvider>,
    selector: CandidateSelector,
}

impl DeletionQueueBridge {
    pub fn new(
        repo: Arc<dyn RevisionRepo>,
        queue: Arc<dyn WorkQueue>,
        settings: Arc<dyn SettingsProvider>,
    ) -> Self {
        Self {
            queue,
            settings,
            selector: CandidateSelector::new(repo),
        }
    }

    /// Queue the candidates of a single entity, typically right after it
    /// was saved. A no-op when the entity's bundle has no usable rule.
    pub async fn enqueue_for_entity(&self, entity: &Entity) -> EnqueueResult {
        let mut result = EnqueueResult::default();
        let Some(policy) = self.settings.settings().policy_for(&entity.bundle) else {
            return result;
        };

        match self
            .selector
            .select(&entity.bundle, &policy, Some(entity.id))
            .await
        {
            Ok(candidates) => self.push_all(&candidates, &mut result).await,
            Err(e) => {
                tracing::error!(
                    entity_id = entity.id,
                    bundle = %entity.bundle,
                    error = %e,
                    "Failed to select deletion candidates for entity"
                );
                result.selection_failures += 1;
            }
        }

        metrics::record_enqueue("entity", result.enqueued);
        result
    }

    /// Discard every pending revision deletion, then queue the candidates
    /// of every bundle with a rule.
    ///
    /// Items queued by a concurrent `enqueue_for_entity` between the clear
    /// and the rescan may be discarded; the rescan re-adds any that are
    /// still candidates.
    pub async fn enqueue_all(&self) -> QueueResult<EnqueueResult> {
        let cleared = self.queue.clear_producer(REVISION_DELETE_PRODUCER).await?;
        let mut result = EnqueueResult {
            cleared,
            ..Default::default()
        };

        for (bundle, policy) in self.settings.settings().active_policies() {
            match self.selector.select(&bundle, &policy, None).await {
                Ok(candidates) => self.push_all(&candidates, &mut result).await,
                Err(e) => {
                    tracing::error!(
                        bundle = %bundle,
                        error = %e,
                        "Failed to select deletion candidates"
                    );
                    metrics::record_cleanup_error("select");
                    result.selection_failures += 1;
                }
            }
        }

        tracing::info!(
            cleared = result.cleared,
            enqueued = result.enqueued,
            failed = result.failed,
            "Revision deletion queue rebuilt"
        );
        metrics::record_enqueue("all", result.enqueued);
        Ok(result)
    }

    async fn push_all(&self, candidates: &CandidateSet, result: &mut EnqueueResult) {
        for (&entity_id, revision_ids) in candidates {
            for &revision_id in revision_ids {
                let item = QueueItem::new(entity_id, revision_id);
                match self.queue.enqueue(REVISION_DELETE_PRODUCER, item).await {
                    Ok(_) => result.enqueued += 1,
                    Err(e) => {
                        tracing::error!(
                            entity_id,
                            revision_id,
                            error = %e,
                            "Failed to enqueue revision deletion"
                        );
                        result.failed += 1;
                    }
                }
            }
        }
    }
}
