use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    error::{DbError, DbResult},
    repos::RevisionRepo,
};
use crate::models::{
    CreateEntity, DeleteOutcome, Entity, EntityId, Revision, RevisionId, RevisionRow,
    SaveRevision,
};

#[derive(Default)]
struct MemoryState {
    entities: BTreeMap<EntityId, Entity>,
    revisions: BTreeMap<RevisionId, Revision>,
    next_entity_id: EntityId,
    next_revision_id: RevisionId,
}

impl MemoryState {
    fn allocate_revision_id(&mut self) -> RevisionId {
        self.next_revision_id += 1;
        self.next_revision_id
    }
}

/// In-memory revision store.
///
/// Entity and revision IDs are allocated from global counters starting at 1,
/// so revision IDs increase in creation order across the whole store.
#[derive(Default)]
pub struct MemoryRevisionRepo {
    state: RwLock<MemoryState>,
}

impl MemoryRevisionRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RevisionRepo for MemoryRevisionRepo {
    async fn list_non_current_revisions(
        &self,
        bundle: &str,
        entity_id: Option<EntityId>,
    ) -> DbResult<Vec<RevisionRow>> {
        let state = self.state.read().await;

        let mut rows: Vec<RevisionRow> = state
            .revisions
            .values()
            .filter(|r| r.bundle == bundle)
            .filter(|r| entity_id.is_none_or(|id| r.entity_id == id))
            .filter(|r| {
                state
                    .entities
                    .get(&r.entity_id)
                    .is_some_and(|e| e.current_revision_id != r.revision_id)
            })
            .map(RevisionRow::from)
            .collect();

        rows.sort_by(|a, b| {
            a.entity_id
                .cmp(&b.entity_id)
                .then(b.revision_id.cmp(&a.revision_id))
        });

        Ok(rows)
    }

    async fn delete_revision(&self, revision_id: RevisionId) -> DbResult<DeleteOutcome> {
        let mut state = self.state.write().await;

        let Some(revision) = state.revisions.get(&revision_id) else {
            return Ok(DeleteOutcome::NotFound);
        };

        let entity_id = revision.entity_id;
        if state
            .entities
            .get(&entity_id)
            .is_some_and(|e| e.current_revision_id == revision_id)
        {
            return Err(DbError::CurrentRevision {
                entity_id,
                revision_id,
            });
        }

        state.revisions.remove(&revision_id);
        Ok(DeleteOutcome::Deleted)
    }

    async fn load_entity(&self, entity_id: EntityId) -> DbResult<Option<Entity>> {
        Ok(self.state.read().await.entities.get(&entity_id).cloned())
    }

    async fn current_revision_id(&self, entity_id: EntityId) -> DbResult<Option<RevisionId>> {
        Ok(self
            .state
            .read()
            .await
            .entities
            .get(&entity_id)
            .map(|e| e.current_revision_id))
    }

    async fn create_entity(&self, input: CreateEntity) -> DbResult<Entity> {
        let mut state = self.state.write().await;

        state.next_entity_id += 1;
        let entity_id = state.next_entity_id;
        let revision_id = state.allocate_revision_id();

        let entity = Entity {
            id: entity_id,
            bundle: input.bundle.clone(),
            current_revision_id: revision_id,
        };
        state.revisions.insert(
            revision_id,
            Revision {
                revision_id,
                entity_id,
                bundle: input.bundle,
                last_modified: input.last_modified,
            },
        );
        state.entities.insert(entity_id, entity.clone());

        Ok(entity)
    }

    async fn save_revision(&self, input: SaveRevision) -> DbResult<Revision> {
        let mut state = self.state.write().await;

        let bundle = state
            .entities
            .get(&input.entity_id)
            .map(|e| e.bundle.clone())
            .ok_or(DbError::EntityNotFound(input.entity_id))?;

        let revision_id = state.allocate_revision_id();
        let revision = Revision {
            revision_id,
            entity_id: input.entity_id,
            bundle,
            last_modified: input.last_modified,
        };
        state.revisions.insert(revision_id, revision.clone());
        if let Some(entity) = state.entities.get_mut(&input.entity_id) {
            entity.current_revision_id = revision_id;
        }

        Ok(revision)
    }

    async fn delete_entity(&self, entity_id: EntityId) -> DbResult<bool> {
        let mut state = self.state.write().await;
        if state.entities.remove(&entity_id).is_none() {
            return Ok(false);
        }
        state.revisions.retain(|_, r| r.entity_id != entity_id);
        Ok(true)
    }

    async fn count_revisions(&self, entity_id: EntityId) -> DbResult<u64> {
        let state = self.state.read().await;
        Ok(state
            .revisions
            .values()
            .filter(|r| r.entity_id == entity_id)
            .count() as u64)
    }

    async fn list_revision_ids(&self, entity_id: EntityId) -> DbResult<Vec<RevisionId>> {
        let state = self.state.read().await;
        Ok(state
            .revisions
            .values()
            .filter(|r| r.entity_id == entity_id)
            .map(|r| r.revision_id)
            .collect())
    }
}
