use async_trait::async_trait;

use crate::{
    db::error::DbResult,
    models::{
        CreateEntity, DeleteOutcome, Entity, EntityId, Revision, RevisionId, RevisionRow,
        SaveRevision,
    },
};

/// Access to the revision table of the content store.
///
/// The retention core only needs the read/delete half of this trait. The
/// write half (`create_entity`, `save_revision`) exists so the content-save
/// path and tests can produce history to prune.
#[async_trait]
pub trait RevisionRepo: Send + Sync {
    /// List every revision of `bundle` that is not the current revision of its
    /// entity, optionally restricted to a single entity.
    ///
    /// Rows are ordered by entity ascending, then revision descending.
    async fn list_non_current_revisions(
        &self,
        bundle: &str,
        entity_id: Option<EntityId>,
    ) -> DbResult<Vec<RevisionRow>>;

    /// Permanently delete a single revision.
    ///
    /// Returns `DeleteOutcome::NotFound` if the revision is already gone.
    /// Deleting the current revision of an entity fails with
    /// `DbError::CurrentRevision`.
    async fn delete_revision(&self, revision_id: RevisionId) -> DbResult<DeleteOutcome>;

    /// Load an entity by ID. Returns `None` if it no longer exists.
    async fn load_entity(&self, entity_id: EntityId) -> DbResult<Option<Entity>>;

    /// Get the current revision of an entity, or `None` if the entity is gone.
    async fn current_revision_id(&self, entity_id: EntityId) -> DbResult<Option<RevisionId>>;

    // ==================== Content Save Operations ====================

    /// Create an entity with its first revision, which becomes current.
    async fn create_entity(&self, input: CreateEntity) -> DbResult<Entity>;

    /// Save a new revision of an entity and make it current.
    async fn save_revision(&self, input: SaveRevision) -> DbResult<Revision>;

    /// Delete an entity and all of its revisions.
    async fn delete_entity(&self, entity_id: EntityId) -> DbResult<bool>;

    /// Count the revisions of an entity, current one included.
    async fn count_revisions(&self, entity_id: EntityId) -> DbResult<u64>;

    /// List the revision IDs of an entity in ascending order.
    async fn list_revision_ids(&self, entity_id: EntityId) -> DbResult<Vec<RevisionId>>;
}
