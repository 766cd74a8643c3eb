use thiserror::Error;

use crate::models::{EntityId, RevisionId};

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database not configured")]
    NotConfigured,

    #[error("Not found")]
    NotFound,

    #[error("Entity {0} not found")]
    EntityNotFound(EntityId),

    /// The store refuses to delete the live revision of an entity.
    #[error("Revision {revision_id} is the current revision of entity {entity_id}")]
    CurrentRevision {
        entity_id: EntityId,
        revision_id: RevisionId,
    },

    #[cfg(feature = "database-sqlite")]
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[cfg(feature = "database-sqlite")]
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type DbResult<T> = Result<T, DbError>;
