use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use super::common::from_millis;
use crate::{
    db::{
        error::{DbError, DbResult},
        repos::RevisionRepo,
    },
    models::{
        CreateEntity, DeleteOutcome, Entity, EntityId, Revision, RevisionId, RevisionRow,
        SaveRevision,
    },
};

pub struct SqliteRevisionRepo {
    pool: SqlitePool,
}

impl SqliteRevisionRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RevisionRepo for SqliteRevisionRepo {
    async fn list_non_current_revisions(
        &self,
        bundle: &str,
        entity_id: Option<EntityId>,
    ) -> DbResult<Vec<RevisionRow>> {
        // Joining the entity table lets us exclude the current revision.
        let rows = sqlx::query(
            r#"
            SELECT r.entity_id, r.revision_id, r.last_modified
            FROM revisions r
            JOIN entities e ON e.id = r.entity_id
            WHERE e.bundle = ?
              AND r.revision_id != e.current_revision_id
              AND (? IS NULL OR r.entity_id = ?)
            ORDER BY r.entity_id ASC, r.revision_id DESC
            "#,
        )
        .bind(bundle)
        .bind(entity_id)
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(RevisionRow {
                    entity_id: row.get("entity_id"),
                    revision_id: row.get("revision_id"),
                    last_modified: from_millis(row.get("last_modified"))?,
                })
            })
            .collect()
    }

    async fn delete_revision(&self, revision_id: RevisionId) -> DbResult<DeleteOutcome> {
        let result = sqlx::query(
            r#"
            DELETE FROM revisions
            WHERE revision_id = ?
              AND NOT EXISTS (
                  SELECT 1 FROM entities e
                  WHERE e.current_revision_id = revisions.revision_id
              )
            "#,
        )
        .bind(revision_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(DeleteOutcome::Deleted);
        }

        // Nothing deleted: either the revision is gone or it is the live one.
        let row = sqlx::query("SELECT entity_id FROM revisions WHERE revision_id = ?")
            .bind(revision_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Err(DbError::CurrentRevision {
                entity_id: row.get("entity_id"),
                revision_id,
            }),
            None => Ok(DeleteOutcome::NotFound),
        }
    }

    async fn load_entity(&self, entity_id: EntityId) -> DbResult<Option<Entity>> {
        let row = sqlx::query(
            r#"
            SELECT id, bundle, current_revision_id
            FROM entities
            WHERE id = ? AND current_revision_id IS NOT NULL
            "#,
        )
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Entity {
            id: row.get("id"),
            bundle: row.get("bundle"),
            current_revision_id: row.get("current_revision_id"),
        }))
    }

    async fn current_revision_id(&self, entity_id: EntityId) -> DbResult<Option<RevisionId>> {
        let current: Option<Option<i64>> =
            sqlx::query_scalar("SELECT current_revision_id FROM entities WHERE id = ?")
                .bind(entity_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(current.flatten())
    }

    async fn create_entity(&self, input: CreateEntity) -> DbResult<Entity> {
        let mut tx = self.pool.begin().await?;

        let entity_id: i64 =
            sqlx::query_scalar("INSERT INTO entities (bundle) VALUES (?) RETURNING id")
                .bind(&input.bundle)
                .fetch_one(&mut *tx)
                .await?;

        let revision_id: i64 = sqlx::query_scalar(
            "INSERT INTO revisions (entity_id, last_modified) VALUES (?, ?) RETURNING revision_id",
        )
        .bind(entity_id)
        .bind(input.last_modified.timestamp_millis())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE entities SET current_revision_id = ? WHERE id = ?")
            .bind(revision_id)
            .bind(entity_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Entity {
            id: entity_id,
            bundle: input.bundle,
            current_revision_id: revision_id,
        })
    }

    async fn save_revision(&self, input: SaveRevision) -> DbResult<Revision> {
        let mut tx = self.pool.begin().await?;

        let bundle: Option<String> = sqlx::query_scalar("SELECT bundle FROM entities WHERE id = ?")
            .bind(input.entity_id)
            .fetch_optional(&mut *tx)
            .await?;
        let bundle = bundle.ok_or(DbError::EntityNotFound(input.entity_id))?;

        let revision_id: i64 = sqlx::query_scalar(
            "INSERT INTO revisions (entity_id, last_modified) VALUES (?, ?) RETURNING revision_id",
        )
        .bind(input.entity_id)
        .bind(input.last_modified.timestamp_millis())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE entities SET current_revision_id = ? WHERE id = ?")
            .bind(revision_id)
            .bind(input.entity_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Revision {
            revision_id,
            entity_id: input.entity_id,
            bundle,
            last_modified: input.last_modified,
        })
    }

    async fn delete_entity(&self, entity_id: EntityId) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM revisions WHERE entity_id = ?")
            .bind(entity_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM entities WHERE id = ?")
            .bind(entity_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_revisions(&self, entity_id: EntityId) -> DbResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM revisions WHERE entity_id = ?")
            .bind(entity_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn list_revision_ids(&self, entity_id: EntityId) -> DbResult<Vec<RevisionId>> {
        let ids = sqlx::query_scalar(
            "SELECT revision_id FROM revisions WHERE entity_id = ? ORDER BY revision_id ASC",
        )
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}
