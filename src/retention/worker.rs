//! Queue consumer for deferred revision deletion.
//!
//! Every item is re-validated against the current rules and store state
//! before anything is deleted, so stale, duplicate, or redelivered items are
//! harmless.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tokio_util::sync::CancellationToken;

use super::{
    bridge::REVISION_DELETE_PRODUCER,
    selector::CandidateSelector,
    settings::SettingsProvider,
};
use crate::{
    config::QueueConfig,
    db::{DbError, DbResult, RevisionRepo},
    models::DeleteOutcome,
    observability::metrics,
    queue::{QueueItem, QueueResult, WorkQueue},
};

/// Why a queue item was consumed without deleting anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The entity no longer exists.
    EntityMissing,
    /// The entity's bundle has no enabled, valid rule any more.
    NoRule,
    /// The revision is no longer a deletion candidate.
    NotCandidate,
    /// The revision was deleted by someone else first.
    AlreadyDeleted,
    /// Dry-run mode; the deletion was only logged.
    DryRun,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::EntityMissing => "entity_missing",
            SkipReason::NoRule => "no_rule",
            SkipReason::NotCandidate => "not_candidate",
            SkipReason::AlreadyDeleted => "already_deleted",
            SkipReason::DryRun => "dry_run",
        }
    }
}

/// What processing a queue item did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Deleted,
    Skipped(SkipReason),
}

/// Re-validates and deletes a single queued revision.
pub struct DeletionWorker {
    repo: Arc<dyn RevisionRepo>,
    settings: Arc<dyn SettingsProvider>,
    selector: CandidateSelector,
}

impl DeletionWorker {
    pub fn new(repo: Arc<dyn RevisionRepo>, settings: Arc<dyn SettingsProvider>) -> Self {
        Self {
            selector: CandidateSelector::new(Arc::clone(&repo)),
            repo,
            settings,
        }
    }

    /// Process one queue item.
    ///
    /// Returns `Err` only for store failures; the item should then be
    /// retried. Every other outcome means the item is done.
    pub async fn process_item(&self, item: QueueItem) -> DbResult<ProcessOutcome> {
        let QueueItem {
            entity_id,
            revision_id,
        } = item;

        let Some(entity) = self.repo.load_entity(entity_id).await? else {
            tracing::debug!(entity_id, revision_id, "Entity gone, skipping queued deletion");
            return Ok(ProcessOutcome::Skipped(SkipReason::EntityMissing));
        };

        let settings = self.settings.settings();
        let Some(policy) = settings.policy_for(&entity.bundle) else {
            tracing::debug!(
                entity_id,
                revision_id,
                bundle = %entity.bundle,
                "No retention rule for bundle, skipping queued deletion"
            );
            return Ok(ProcessOutcome::Skipped(SkipReason::NoRule));
        };

        let candidates = self
            .selector
            .select(&entity.bundle, &policy, Some(entity_id))
            .await?;
        let still_candidate = candidates
            .get(&entity_id)
            .is_some_and(|ids| ids.contains(&revision_id));
        if !still_candidate {
            tracing::debug!(
                entity_id,
                revision_id,
                "Revision is no longer a deletion candidate"
            );
            return Ok(ProcessOutcome::Skipped(SkipReason::NotCandidate));
        }

        if settings.dry_run() {
            tracing::info!(entity_id, revision_id, "DRY RUN: Would delete revision");
            metrics::record_revision_deletion("queue", "dry_run");
            return Ok(ProcessOutcome::Skipped(SkipReason::DryRun));
        }

        match self.repo.delete_revision(revision_id).await {
            Ok(DeleteOutcome::Deleted) => {
                tracing::debug!(entity_id, revision_id, "Deleted revision");
                metrics::record_revision_deletion("queue", "deleted");
                Ok(ProcessOutcome::Deleted)
            }
            Ok(DeleteOutcome::NotFound) => {
                tracing::debug!(entity_id, revision_id, "Revision already deleted");
                metrics::record_revision_deletion("queue", "not_found");
                Ok(ProcessOutcome::Skipped(SkipReason::AlreadyDeleted))
            }
            Err(DbError::CurrentRevision { .. }) => {
                metrics::record_revision_deletion("queue", "conflict");
                Ok(ProcessOutcome::Skipped(SkipReason::NotCandidate))
            }
            Err(e) => {
                metrics::record_revision_deletion("queue", "failed");
                Err(e)
            }
        }
    }
}

/// Limits applied to each queue runner tick.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub items_per_tick: u32,
    pub max_duration: Duration,
    pub lease: Duration,
    /// How long a failed item stays hidden before its next delivery.
    pub retry_delay: Duration,
    pub max_attempts: u32,
}

impl From<&QueueConfig> for RunnerConfig {
    fn from(config: &QueueConfig) -> Self {
        Self {
            items_per_tick: config.items_per_tick,
            max_duration: Duration::from_secs(config.max_duration_secs),
            lease: Duration::from_secs(config.lease_secs),
            retry_delay: Duration::from_secs(config.retry_delay_secs),
            max_attempts: config.max_attempts,
        }
    }
}

/// Results from a single queue runner tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunnerTickResult {
    /// Items claimed from the queue.
    pub claimed: u64,
    /// Items whose revision was deleted.
    pub deleted: u64,
    /// Items consumed without a deletion.
    pub skipped: u64,
    /// Items that failed and were returned to the queue.
    pub released: u64,
    /// Items that failed too many times and were removed.
    pub dropped: u64,
}

impl RunnerTickResult {
    pub fn is_idle(&self) -> bool {
        self.claimed == 0
    }
}

/// Drains the revision deletion queue through a [`DeletionWorker`].
pub struct QueueRunner {
    queue: Arc<dyn WorkQueue>,
    worker: DeletionWorker,
    config: RunnerConfig,
}

impl QueueRunner {
    pub fn new(queue: Arc<dyn WorkQueue>, worker: DeletionWorker, config: RunnerConfig) -> Self {
        Self {
            queue,
            worker,
            config,
        }
    }

    /// Process up to `items_per_tick` items, stopping early once the tick's
    /// time budget is spent.
    pub async fn run_once(&self) -> QueueResult<RunnerTickResult> {
        let started = Instant::now();
        let mut result = RunnerTickResult::default();

        while result.claimed < u64::from(self.config.items_per_tick)
            && started.elapsed() < self.config.max_duration
        {
            let Some(entry) = self
                .queue
                .claim(REVISION_DELETE_PRODUCER, self.config.lease)
                .await?
            else {
                break;
            };
            result.claimed += 1;
            metrics::record_queue_operation("claim");

            match self.worker.process_item(entry.item).await {
                Ok(outcome) => {
                    match outcome {
                        ProcessOutcome::Deleted => result.deleted += 1,
                        ProcessOutcome::Skipped(reason) => {
                            result.skipped += 1;
                            metrics::record_queue_operation(reason.as_str());
                        }
                    }
                    self.queue.complete(entry.id).await?;
                    metrics::record_queue_operation("complete");
                }
                Err(e) if entry.attempts >= self.config.max_attempts => {
                    tracing::error!(
                        entry_id = %entry.id,
                        entity_id = entry.item.entity_id,
                        revision_id = entry.item.revision_id,
                        attempts = entry.attempts,
                        error = %e,
                        "Dropping queued revision deletion after repeated failures"
                    );
                    self.queue.complete(entry.id).await?;
                    result.dropped += 1;
                    metrics::record_queue_operation("drop");
                }
                Err(e) => {
                    tracing::warn!(
                        entry_id = %entry.id,
                        entity_id = entry.item.entity_id,
                        revision_id = entry.item.revision_id,
                        attempts = entry.attempts,
                        error = %e,
                        "Failed to process queued revision deletion, will retry"
                    );
                    self.queue.release(entry.id, self.config.retry_delay).await?;
                    result.released += 1;
                    metrics::record_queue_operation("release");
                }
            }
        }

        metrics::record_run_duration("queue", started.elapsed().as_secs_f64());
        Ok(result)
    }
}

/// Starts the queue runner loop.
///
/// Runs one tick every `interval` until `cancel` is triggered. A tick is
/// never interrupted; cancellation takes effect between ticks.
pub async fn start_queue_runner(
    runner: Arc<QueueRunner>,
    interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        interval_secs = interval.as_secs(),
        items_per_tick = runner.config.items_per_tick,
        "Starting revision deletion queue runner"
    );

    loop {
        match runner.run_once().await {
            Ok(result) if !result.is_idle() => {
                tracing::info!(
                    claimed = result.claimed,
                    deleted = result.deleted,
                    skipped = result.skipped,
                    released = result.released,
                    dropped = result.dropped,
                    "Queue runner tick complete"
                );
            }
            Ok(_) => tracing::debug!("Queue runner tick complete, queue empty"),
            Err(e) => {
                tracing::error!(error = %e, "Error running deletion queue");
                metrics::record_cleanup_error("queue");
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    tracing::info!("Revision deletion queue runner stopped");
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};

    use super::*;
    use crate::{
        config::BundleRule,
        db::MemoryRevisionRepo,
        models::{
            CreateEntity, Entity, EntityId, Revision, RevisionId, RevisionRow, SaveRevision,
        },
        queue::MemoryQueue,
        retention::settings::{RetentionSettings, SharedSettings},
    };

    async fn entity_with_revisions(
        repo: &MemoryRevisionRepo,
        total: usize,
    ) -> (Entity, Vec<RevisionId>) {
        let start = Utc::now() - ChronoDuration::days(30);
        let entity = repo
            .create_entity(CreateEntity {
                bundle: "article".into(),
                last_modified: start,
            })
            .await
            .unwrap();
        for i in 1..total {
            repo.save_revision(SaveRevision {
                entity_id: entity.id,
                last_modified: start + ChronoDuration::days(i as i64),
            })
            .await
            .unwrap();
        }
        let ids = repo.list_revision_ids(entity.id).await.unwrap();
        (entity, ids)
    }

    fn worker(repo: Arc<dyn RevisionRepo>, settings: Arc<SharedSettings>) -> DeletionWorker {
        DeletionWorker::new(repo, settings)
    }

    fn count_settings(keep: i64) -> Arc<SharedSettings> {
        Arc::new(SharedSettings::new(
            RetentionSettings::new().with_rule("article", BundleRule::count(keep)),
        ))
    }

    #[tokio::test]
    async fn test_process_deletes_candidate() {
        let repo = Arc::new(MemoryRevisionRepo::new());
        let (entity, ids) = entity_with_revisions(&repo, 4).await;
        let worker = worker(repo.clone(), count_settings(1));

        let outcome = worker
            .process_item(QueueItem::new(entity.id, ids[0]))
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::Deleted);

        // Processing the same item again finds it gone from the candidates
        let outcome = worker
            .process_item(QueueItem::new(entity.id, ids[0]))
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::Skipped(SkipReason::NotCandidate));
        assert_eq!(repo.count_revisions(entity.id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_process_protected_revisions() {
        let repo = Arc::new(MemoryRevisionRepo::new());
        let (entity, ids) = entity_with_revisions(&repo, 4).await;
        let worker = worker(repo.clone(), count_settings(1));

        // ids[2] is kept by the floor, ids[3] is current
        for revision_id in [ids[2], ids[3]] {
            let outcome = worker
                .process_item(QueueItem::new(entity.id, revision_id))
                .await
                .unwrap();
            assert_eq!(outcome, ProcessOutcome::Skipped(SkipReason::NotCandidate));
        }
        assert_eq!(repo.count_revisions(entity.id).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_process_after_rule_disabled() {
        let repo = Arc::new(MemoryRevisionRepo::new());
        let (entity, ids) = entity_with_revisions(&repo, 4).await;
        let settings = count_settings(1);
        let worker = worker(repo.clone(), settings.clone());

        settings.replace(RetentionSettings::new().with_rule(
            "article",
            BundleRule {
                enabled: false,
                ..BundleRule::count(1)
            },
        ));

        let outcome = worker
            .process_item(QueueItem::new(entity.id, ids[0]))
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::Skipped(SkipReason::NoRule));
        assert_eq!(repo.count_revisions(entity.id).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_process_after_entity_deleted() {
        let repo = Arc::new(MemoryRevisionRepo::new());
        let (entity, ids) = entity_with_revisions(&repo, 4).await;
        let worker = worker(repo.clone(), count_settings(1));

        repo.delete_entity(entity.id).await.unwrap();

        let outcome = worker
            .process_item(QueueItem::new(entity.id, ids[0]))
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::Skipped(SkipReason::EntityMissing));
    }

    #[tokio::test]
    async fn test_process_dry_run() {
        let repo = Arc::new(MemoryRevisionRepo::new());
        let (entity, ids) = entity_with_revisions(&repo, 4).await;
        let settings = Arc::new(SharedSettings::new(
            RetentionSettings::new()
                .with_rule("article", BundleRule::count(1))
                .with_dry_run(true),
        ));
        let worker = worker(repo.clone(), settings);

        let outcome = worker
            .process_item(QueueItem::new(entity.id, ids[0]))
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::Skipped(SkipReason::DryRun));
        assert_eq!(repo.count_revisions(entity.id).await.unwrap(), 4);
    }

    /// Store whose deletes always fail; everything else is delegated.
    struct FailingDeletes(MemoryRevisionRepo);

    #[async_trait]
    impl RevisionRepo for FailingDeletes {
        async fn list_non_current_revisions(
            &self,
            bundle: &str,
            entity_id: Option<EntityId>,
        ) -> DbResult<Vec<RevisionRow>> {
            self.0.list_non_current_revisions(bundle, entity_id).await
        }
        async fn delete_revision(&self, _revision_id: RevisionId) -> DbResult<DeleteOutcome> {
            Err(DbError::Internal("disk full".into()))
        }
        async fn load_entity(&self, entity_id: EntityId) -> DbResult<Option<Entity>> {
            self.0.load_entity(entity_id).await
        }
        async fn current_revision_id(&self, entity_id: EntityId) -> DbResult<Option<RevisionId>> {
            self.0.current_revision_id(entity_id).await
        }
        async fn create_entity(&self, input: CreateEntity) -> DbResult<Entity> {
            self.0.create_entity(input).await
        }
        async fn save_revision(&self, input: SaveRevision) -> DbResult<Revision> {
            self.0.save_revision(input).await
        }
        async fn delete_entity(&self, entity_id: EntityId) -> DbResult<bool> {
            self.0.delete_entity(entity_id).await
        }
        async fn count_revisions(&self, entity_id: EntityId) -> DbResult<u64> {
            self.0.count_revisions(entity_id).await
        }
        async fn list_revision_ids(&self, entity_id: EntityId) -> DbResult<Vec<RevisionId>> {
            self.0.list_revision_ids(entity_id).await
        }
    }

    fn runner_config(max_attempts: u32) -> RunnerConfig {
        RunnerConfig {
            items_per_tick: 10,
            max_duration: Duration::from_secs(60),
            lease: Duration::from_secs(60),
            retry_delay: RETRY_DELAY,
            max_attempts,
        }
    }

    const RETRY_DELAY: Duration = Duration::from_millis(50);

    async fn wait_for_retry() {
        tokio::time::sleep(RETRY_DELAY * 3).await;
    }

    #[tokio::test]
    async fn test_runner_completes_items() {
        let repo = Arc::new(MemoryRevisionRepo::new());
        let (entity, ids) = entity_with_revisions(&repo, 4).await;
        let queue = Arc::new(MemoryQueue::new());
        for &id in &ids {
            queue
                .enqueue(REVISION_DELETE_PRODUCER, QueueItem::new(entity.id, id))
                .await
                .unwrap();
        }

        let runner = QueueRunner::new(
            queue.clone(),
            worker(repo.clone(), count_settings(1)),
            runner_config(3),
        );
        let result = runner.run_once().await.unwrap();

        assert_eq!(result.claimed, 4);
        assert_eq!(result.deleted, 2);
        assert_eq!(result.skipped, 2);
        assert!(queue.is_empty(REVISION_DELETE_PRODUCER).await.unwrap());
        assert_eq!(repo.count_revisions(entity.id).await.unwrap(), 2);

        let idle = runner.run_once().await.unwrap();
        assert!(idle.is_idle());
    }

    #[tokio::test]
    async fn test_runner_respects_items_per_tick() {
        let repo = Arc::new(MemoryRevisionRepo::new());
        let (entity, ids) = entity_with_revisions(&repo, 6).await;
        let queue = Arc::new(MemoryQueue::new());
        for &id in &ids[..4] {
            queue
                .enqueue(REVISION_DELETE_PRODUCER, QueueItem::new(entity.id, id))
                .await
                .unwrap();
        }

        let config = RunnerConfig {
            items_per_tick: 3,
            ..runner_config(3)
        };
        let runner = QueueRunner::new(queue.clone(), worker(repo, count_settings(1)), config);

        assert_eq!(runner.run_once().await.unwrap().claimed, 3);
        assert_eq!(queue.len(REVISION_DELETE_PRODUCER).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_runner_releases_then_drops_failing_items() {
        let inner = MemoryRevisionRepo::new();
        let (entity, ids) = entity_with_revisions(&inner, 4).await;
        let repo: Arc<dyn RevisionRepo> = Arc::new(FailingDeletes(inner));
        let queue = Arc::new(MemoryQueue::new());
        queue
            .enqueue(REVISION_DELETE_PRODUCER, QueueItem::new(entity.id, ids[0]))
            .await
            .unwrap();

        let runner = QueueRunner::new(
            queue.clone(),
            DeletionWorker::new(repo, count_settings(1)),
            runner_config(2),
        );

        let first = runner.run_once().await.unwrap();
        assert_eq!(first.claimed, 1);
        assert_eq!(first.released, 1);
        assert_eq!(queue.len(REVISION_DELETE_PRODUCER).await.unwrap(), 1);

        // The released item waits out its retry delay
        assert!(runner.run_once().await.unwrap().is_idle());

        wait_for_retry().await;
        let second = runner.run_once().await.unwrap();
        assert_eq!(second.claimed, 1);
        assert_eq!(second.dropped, 1);
        assert!(queue.is_empty(REVISION_DELETE_PRODUCER).await.unwrap());
    }

    #[tokio::test]
    async fn test_failing_item_is_attempted_once_per_tick() {
        let inner = MemoryRevisionRepo::new();
        let (entity, ids) = entity_with_revisions(&inner, 4).await;
        let repo: Arc<dyn RevisionRepo> = Arc::new(FailingDeletes(inner));
        let queue = Arc::new(MemoryQueue::new());
        queue
            .enqueue(REVISION_DELETE_PRODUCER, QueueItem::new(entity.id, ids[0]))
            .await
            .unwrap();

        let runner = QueueRunner::new(
            queue.clone(),
            DeletionWorker::new(repo, count_settings(1)),
            runner_config(5),
        );

        for tick in 1..=4 {
            let result = runner.run_once().await.unwrap();
            assert_eq!(
                result,
                RunnerTickResult {
                    claimed: 1,
                    released: 1,
                    ..Default::default()
                },
                "tick {tick}"
            );
            assert_eq!(queue.len(REVISION_DELETE_PRODUCER).await.unwrap(), 1);
            wait_for_retry().await;
        }

        let last = runner.run_once().await.unwrap();
        assert_eq!(last.claimed, 1);
        assert_eq!(last.dropped, 1);
        assert!(queue.is_empty(REVISION_DELETE_PRODUCER).await.unwrap());
    }

    #[tokio::test]
    async fn test_runner_loop_stops_on_cancel() {
        let repo = Arc::new(MemoryRevisionRepo::new());
        let queue = Arc::new(MemoryQueue::new());
        let runner = Arc::new(QueueRunner::new(
            queue,
            worker(repo, count_settings(1)),
            runner_config(3),
        ));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(start_queue_runner(
            runner,
            Duration::from_secs(3600),
            cancel.clone(),
        ));
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("runner should stop after cancellation")
            .unwrap();
    }
}
