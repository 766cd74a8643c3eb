use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of an entity in the revision store.
pub type EntityId = i64;

/// Identifier of a revision. Strictly increasing per entity in creation order.
pub type RevisionId = i64;

/// An entity as seen by the retention core: its bundle and live revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique identifier of the entity
    pub id: EntityId,
    /// Bundle (entity sub-type) the entity belongs to
    pub bundle: String,
    /// The current (live) revision, never a deletion candidate
    pub current_revision_id: RevisionId,
}

/// A historical snapshot of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub revision_id: RevisionId,
    pub entity_id: EntityId,
    pub bundle: String,
    /// When this revision was last modified (the entity's changed time at save)
    pub last_modified: DateTime<Utc>,
}

/// Row returned when listing the non-current revisions of a bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevisionRow {
    pub entity_id: EntityId,
    pub revision_id: RevisionId,
    pub last_modified: DateTime<Utc>,
}

impl From<&Revision> for RevisionRow {
    fn from(revision: &Revision) -> Self {
        Self {
            entity_id: revision.entity_id,
            revision_id: revision.revision_id,
            last_modified: revision.last_modified,
        }
    }
}

/// Result of asking the store to delete a single revision.
///
/// Store failures are reported through `DbError`; absence is an expected
/// outcome and is kept out of the error path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The revision existed and was removed
    Deleted,
    /// The revision no longer exists (already deleted by a prior or concurrent run)
    NotFound,
}

/// Input for saving a new revision of an existing entity.
#[derive(Debug, Clone)]
pub struct SaveRevision {
    pub entity_id: EntityId,
    pub last_modified: DateTime<Utc>,
}

/// Input for creating a new entity along with its first revision.
#[derive(Debug, Clone)]
pub struct CreateEntity {
    pub bundle: String,
    pub last_modified: DateTime<Utc>,
}
