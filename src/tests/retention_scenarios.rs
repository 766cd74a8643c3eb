use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::{
    config::{BundleRule, PrunerConfig},
    db::{DbError, DbResult, MemoryRevisionRepo, RevisionRepo},
    models::{
        CreateEntity, DeleteOutcome, Entity, EntityId, Revision, RevisionId, RevisionRow,
        SaveRevision,
    },
    queue::{MemoryQueue, QueueItem, WorkQueue},
    retention::{
        DeletionQueueBridge, DeletionWorker, ProcessOutcome, QueueRunner, REVISION_DELETE_PRODUCER,
        RetentionEngine, RetentionSettings, RunnerConfig, SharedSettings, SkipReason,
    },
};

/// Create an entity with `total` revisions, one per day starting at `start`.
async fn seed(
    repo: &dyn RevisionRepo,
    bundle: &str,
    total: usize,
    start: DateTime<Utc>,
) -> Entity {
    let mut entity = repo
        .create_entity(CreateEntity {
            bundle: bundle.into(),
            last_modified: start,
        })
        .await
        .unwrap();
    for i in 1..total {
        let revision = repo
            .save_revision(SaveRevision {
                entity_id: entity.id,
                last_modified: start + ChronoDuration::days(i as i64),
            })
            .await
            .unwrap();
        entity.current_revision_id = revision.revision_id;
    }
    entity
}

fn days_ago(days: i64) -> DateTime<Utc> {
    Utc::now() - ChronoDuration::days(days)
}

fn shared(settings: RetentionSettings) -> Arc<SharedSettings> {
    Arc::new(SharedSettings::new(settings))
}

fn runner_config() -> RunnerConfig {
    RunnerConfig {
        items_per_tick: 100,
        max_duration: Duration::from_secs(60),
        lease: Duration::from_secs(60),
        retry_delay: Duration::from_secs(60),
        max_attempts: 3,
    }
}

#[tokio::test]
async fn test_count_rule_cleanup_is_idempotent() {
    let repo = Arc::new(MemoryRevisionRepo::new());
    let entity = seed(&*repo, "article", 12, days_ago(30)).await;
    let engine = RetentionEngine::new(
        repo.clone(),
        shared(RetentionSettings::new().with_rule("article", BundleRule::count(5))),
    );

    let first = engine.run_cleanup().await;
    assert_eq!(first.deleted, 6);
    assert!(!first.budget_exhausted);

    let remaining = repo.list_revision_ids(entity.id).await.unwrap();
    assert_eq!(remaining.len(), 6);
    assert_eq!(remaining.last(), Some(&entity.current_revision_id));

    let second = engine.run_cleanup().await;
    assert_eq!(second.attempted, 0);
    assert_eq!(repo.list_revision_ids(entity.id).await.unwrap(), remaining);
}

#[tokio::test]
async fn test_cron_limit_spreads_work_over_runs() {
    let repo = Arc::new(MemoryRevisionRepo::new());
    let entity = seed(&*repo, "article", 12, days_ago(30)).await;
    let engine = RetentionEngine::new(
        repo.clone(),
        shared(
            RetentionSettings::new()
                .with_rule("article", BundleRule::count(1))
                .with_cron_limit(2),
        ),
    );

    // 11 non-current revisions, one kept: 10 candidates at 2 per run
    for run in 1..=5 {
        let result = engine.run_cleanup().await;
        assert_eq!(result.deleted, 2, "run {run}");
        assert_eq!(result.budget_exhausted, run < 5, "run {run}");
    }

    assert_eq!(repo.count_revisions(entity.id).await.unwrap(), 2);
    assert_eq!(engine.run_cleanup().await.attempted, 0);
}

#[tokio::test]
async fn test_current_revision_survives_every_rule() {
    let repo = Arc::new(MemoryRevisionRepo::new());
    let article = seed(&*repo, "article", 6, days_ago(400)).await;
    let page = seed(&*repo, "page", 6, days_ago(400)).await;
    let engine = RetentionEngine::new(
        repo.clone(),
        shared(
            RetentionSettings::new()
                .with_rule("article", BundleRule::count(1))
                .with_rule("page", BundleRule::age(1, "1 day")),
        ),
    );

    engine.run_cleanup().await;

    // Count keeps one historical revision, age with keep = 1 keeps none
    assert_eq!(
        repo.list_revision_ids(article.id).await.unwrap(),
        vec![article.current_revision_id - 1, article.current_revision_id]
    );
    assert_eq!(
        repo.list_revision_ids(page.id).await.unwrap(),
        vec![page.current_revision_id]
    );
}

#[tokio::test]
async fn test_age_rule_keeps_floor_and_recent_revisions() {
    let repo = Arc::new(MemoryRevisionRepo::new());
    // Daily revisions ending today
    let old = seed(&*repo, "article", 10, days_ago(9)).await;
    // Daily revisions that are all well past the age limit
    let ancient = seed(&*repo, "article", 10, days_ago(60)).await;
    let engine = RetentionEngine::new(
        repo.clone(),
        shared(RetentionSettings::new().with_rule("article", BundleRule::age(3, "5 days"))),
    );

    engine.run_cleanup().await;

    // Revisions younger than 5 days stay, and so do the two newest of the
    // older ones: only the three oldest go
    let ids = repo.list_revision_ids(old.id).await.unwrap();
    assert_eq!(ids.len(), 7);
    assert_eq!(ids[0], old.current_revision_id - 6);
    assert_eq!(ids.last(), Some(&old.current_revision_id));

    let ids = repo.list_revision_ids(ancient.id).await.unwrap();
    assert_eq!(
        ids,
        vec![
            ancient.current_revision_id - 2,
            ancient.current_revision_id - 1,
            ancient.current_revision_id,
        ]
    );
}

#[tokio::test]
async fn test_invalid_rule_leaves_bundle_alone() {
    let config = PrunerConfig::from_str(
        r#"
        [retention.bundles.article]
        method = "age"
        keep = 2

        [retention.bundles.page]
        method = "count"
        keep = 1
        "#,
    )
    .unwrap();
    let settings = RetentionSettings::from_config(&config.retention);
    assert_eq!(settings.validation_errors().len(), 1);

    let repo = Arc::new(MemoryRevisionRepo::new());
    let article = seed(&*repo, "article", 5, days_ago(30)).await;
    let page = seed(&*repo, "page", 5, days_ago(30)).await;
    let engine = RetentionEngine::new(repo.clone(), shared(settings));

    let result = engine.run_cleanup().await;
    assert_eq!(result.deleted, 3);
    assert_eq!(repo.count_revisions(article.id).await.unwrap(), 5);
    assert_eq!(repo.count_revisions(page.id).await.unwrap(), 2);
}

#[tokio::test]
async fn test_queue_path_matches_direct_cleanup() {
    let repo = Arc::new(MemoryRevisionRepo::new());
    let queue = Arc::new(MemoryQueue::new());
    let settings = shared(RetentionSettings::new().with_rule("article", BundleRule::count(5)));
    let entity = seed(&*repo, "article", 12, days_ago(30)).await;

    let bridge = DeletionQueueBridge::new(repo.clone(), queue.clone(), settings.clone());
    let runner = QueueRunner::new(
        queue.clone(),
        DeletionWorker::new(repo.clone(), settings.clone()),
        runner_config(),
    );

    assert_eq!(bridge.enqueue_for_entity(&entity).await.enqueued, 6);
    let tick = runner.run_once().await.unwrap();
    assert_eq!(tick.deleted, 6);
    assert!(queue.is_empty(REVISION_DELETE_PRODUCER).await.unwrap());
    assert_eq!(repo.count_revisions(entity.id).await.unwrap(), 6);
}

#[tokio::test]
async fn test_duplicate_items_are_harmless() {
    let repo = Arc::new(MemoryRevisionRepo::new());
    let queue = Arc::new(MemoryQueue::new());
    let settings = shared(RetentionSettings::new().with_rule("article", BundleRule::count(2)));
    let entity = seed(&*repo, "article", 6, days_ago(30)).await;

    let bridge = DeletionQueueBridge::new(repo.clone(), queue.clone(), settings.clone());
    bridge.enqueue_for_entity(&entity).await;
    bridge.enqueue_for_entity(&entity).await;
    assert_eq!(queue.len(REVISION_DELETE_PRODUCER).await.unwrap(), 6);

    let runner = QueueRunner::new(
        queue.clone(),
        DeletionWorker::new(repo.clone(), settings),
        runner_config(),
    );
    let tick = runner.run_once().await.unwrap();
    assert_eq!(tick.claimed, 6);
    assert_eq!(tick.deleted, 3);
    assert_eq!(tick.skipped, 3);
    assert_eq!(repo.count_revisions(entity.id).await.unwrap(), 3);
}

#[tokio::test]
async fn test_worker_revalidates_against_current_state() {
    let repo = Arc::new(MemoryRevisionRepo::new());
    let queue = Arc::new(MemoryQueue::new());
    let settings = shared(RetentionSettings::new().with_rule("article", BundleRule::count(1)));
    let kept = seed(&*repo, "article", 5, days_ago(30)).await;
    let removed = seed(&*repo, "article", 5, days_ago(30)).await;
    let disabled = seed(&*repo, "page", 5, days_ago(30)).await;

    let bridge = DeletionQueueBridge::new(repo.clone(), queue.clone(), settings.clone());
    bridge.enqueue_for_entity(&kept).await;
    bridge.enqueue_for_entity(&removed).await;
    queue
        .enqueue(
            REVISION_DELETE_PRODUCER,
            QueueItem::new(disabled.id, disabled.current_revision_id - 4),
        )
        .await
        .unwrap();

    // Between enqueue and processing: a looser rule, a deleted entity, and
    // a bundle that never had a rule
    settings.replace(RetentionSettings::new().with_rule("article", BundleRule::count(10)));
    repo.delete_entity(removed.id).await.unwrap();

    let worker = DeletionWorker::new(repo.clone(), settings);
    let mut outcomes = Vec::new();
    while let Some(entry) = queue
        .claim(REVISION_DELETE_PRODUCER, Duration::from_secs(60))
        .await
        .unwrap()
    {
        outcomes.push(worker.process_item(entry.item).await.unwrap());
        queue.complete(entry.id).await.unwrap();
    }

    assert_eq!(
        outcomes,
        [
            vec![ProcessOutcome::Skipped(SkipReason::NotCandidate); 3],
            vec![ProcessOutcome::Skipped(SkipReason::EntityMissing); 3],
            vec![ProcessOutcome::Skipped(SkipReason::NoRule)],
        ]
        .concat()
    );
    assert_eq!(repo.count_revisions(kept.id).await.unwrap(), 5);
    assert_eq!(repo.count_revisions(disabled.id).await.unwrap(), 5);
}

#[tokio::test]
async fn test_rescan_after_rule_change() {
    let repo = Arc::new(MemoryRevisionRepo::new());
    let queue = Arc::new(MemoryQueue::new());
    let settings = shared(RetentionSettings::new().with_rule("article", BundleRule::count(1)));
    seed(&*repo, "article", 6, days_ago(30)).await;
    seed(&*repo, "article", 6, days_ago(30)).await;

    let bridge = DeletionQueueBridge::new(repo.clone(), queue.clone(), settings.clone());
    assert_eq!(bridge.enqueue_all().await.unwrap().enqueued, 8);

    settings.replace(RetentionSettings::new().with_rule("article", BundleRule::count(3)));
    let result = bridge.enqueue_all().await.unwrap();
    assert_eq!(result.cleared, 8);
    assert_eq!(result.enqueued, 4);
    assert_eq!(queue.len(REVISION_DELETE_PRODUCER).await.unwrap(), 4);
}

#[tokio::test]
async fn test_dry_run_reports_without_deleting() {
    let repo = Arc::new(MemoryRevisionRepo::new());
    let queue = Arc::new(MemoryQueue::new());
    let settings = shared(
        RetentionSettings::new()
            .with_rule("article", BundleRule::count(1))
            .with_dry_run(true),
    );
    let entity = seed(&*repo, "article", 5, days_ago(30)).await;

    let engine = RetentionEngine::new(repo.clone(), settings.clone());
    let result = engine.run_cleanup().await;
    assert!(result.dry_run);
    assert_eq!(result.deleted, 3);

    let bridge = DeletionQueueBridge::new(repo.clone(), queue.clone(), settings.clone());
    bridge.enqueue_for_entity(&entity).await;
    let runner = QueueRunner::new(
        queue.clone(),
        DeletionWorker::new(repo.clone(), settings),
        runner_config(),
    );
    let tick = runner.run_once().await.unwrap();
    assert_eq!(tick.skipped, 3);
    assert_eq!(tick.deleted, 0);

    assert_eq!(repo.count_revisions(entity.id).await.unwrap(), 5);
}

/// Store whose deletes fail for a fixed set of revisions.
struct FlakyStore {
    inner: MemoryRevisionRepo,
    broken: Vec<RevisionId>,
}

#[async_trait]
impl RevisionRepo for FlakyStore {
    async fn list_non_current_revisions(
        &self,
        bundle: &str,
        entity_id: Option<EntityId>,
    ) -> DbResult<Vec<RevisionRow>> {
        self.inner.list_non_current_revisions(bundle, entity_id).await
    }
    async fn delete_revision(&self, revision_id: RevisionId) -> DbResult<DeleteOutcome> {
        if self.broken.contains(&revision_id) {
            return Err(DbError::Internal(format!("revision {revision_id} is locked")));
        }
        self.inner.delete_revision(revision_id).await
    }
    async fn load_entity(&self, entity_id: EntityId) -> DbResult<Option<Entity>> {
        self.inner.load_entity(entity_id).await
    }
    async fn current_revision_id(&self, entity_id: EntityId) -> DbResult<Option<RevisionId>> {
        self.inner.current_revision_id(entity_id).await
    }
    async fn create_entity(&self, input: CreateEntity) -> DbResult<Entity> {
        self.inner.create_entity(input).await
    }
    async fn save_revision(&self, input: SaveRevision) -> DbResult<Revision> {
        self.inner.save_revision(input).await
    }
    async fn delete_entity(&self, entity_id: EntityId) -> DbResult<bool> {
        self.inner.delete_entity(entity_id).await
    }
    async fn count_revisions(&self, entity_id: EntityId) -> DbResult<u64> {
        self.inner.count_revisions(entity_id).await
    }
    async fn list_revision_ids(&self, entity_id: EntityId) -> DbResult<Vec<RevisionId>> {
        self.inner.list_revision_ids(entity_id).await
    }
}

#[tokio::test]
async fn test_failed_deletions_are_isolated() {
    let inner = MemoryRevisionRepo::new();
    let entity = seed(&inner, "article", 6, days_ago(30)).await;
    let ids = inner.list_revision_ids(entity.id).await.unwrap();
    let repo = Arc::new(FlakyStore {
        inner,
        broken: vec![ids[2]],
    });
    let engine = RetentionEngine::new(
        repo.clone(),
        shared(RetentionSettings::new().with_rule("article", BundleRule::count(1))),
    );

    let result = engine.run_cleanup().await;
    assert_eq!(result.attempted, 4);
    assert_eq!(result.deleted, 3);
    assert_eq!(result.failed, 1);
    assert!(result.has_failures());

    // The failing revision is retried on the next run and fails again
    let result = engine.run_cleanup().await;
    assert_eq!(result.attempted, 1);
    assert_eq!(result.failed, 1);
    assert_eq!(
        repo.list_revision_ids(entity.id).await.unwrap(),
        vec![ids[2], ids[4], ids[5]]
    );
}
