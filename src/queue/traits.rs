use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::QueueResult;
use crate::models::{EntityId, RevisionId};

/// A single deferred deletion: one revision of one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueItem {
    pub entity_id: EntityId,
    pub revision_id: RevisionId,
}

impl QueueItem {
    pub fn new(entity_id: EntityId, revision_id: RevisionId) -> Self {
        Self {
            entity_id,
            revision_id,
        }
    }
}

/// A queued item together with its delivery bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Unique ID for this entry.
    pub id: Uuid,
    /// Name of the producer that enqueued the item.
    pub producer: String,
    /// The queued payload.
    pub item: QueueItem,
    /// Number of times this entry has been claimed, including the current claim.
    pub attempts: u32,
    /// When this entry was enqueued.
    pub created_at: DateTime<Utc>,
    /// Lease expiry of the current claim. An expired lease makes the entry
    /// deliverable again.
    pub claimed_until: Option<DateTime<Utc>>,
}

/// Truncate a DateTime to millisecond precision, the resolution queue
/// timestamps are persisted at.
pub(crate) fn truncate_to_millis(dt: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(dt.timestamp_millis()).unwrap_or(dt)
}

impl QueueEntry {
    pub fn new(producer: impl Into<String>, item: QueueItem) -> Self {
        Self {
            id: Uuid::new_v4(),
            producer: producer.into(),
            item,
            attempts: 0,
            created_at: truncate_to_millis(Utc::now()),
            claimed_until: None,
        }
    }

    /// Whether the entry can be handed to a consumer at `now`.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.claimed_until.is_none_or(|until| until <= now)
    }
}

/// Work queue with at-least-once delivery.
///
/// Items are delivered in FIFO order per producer on a best-effort basis.
/// Duplicates are allowed; consumers must tolerate them.
/// Implementations must be thread-safe and support concurrent access.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Append an item to the queue. Returns the entry ID.
    async fn enqueue(&self, producer: &str, item: QueueItem) -> QueueResult<Uuid>;

    /// Claim the oldest deliverable entry for `producer`, leasing it for
    /// `lease`. Returns None if nothing is deliverable.
    async fn claim(&self, producer: &str, lease: Duration) -> QueueResult<Option<QueueEntry>>;

    /// Remove an entry after it has been processed.
    async fn complete(&self, id: Uuid) -> QueueResult<bool>;

    /// Return a claimed entry to the queue. It becomes deliverable again
    /// once `delay` has passed.
    async fn release(&self, id: Uuid, delay: Duration) -> QueueResult<bool>;

    /// Delete every entry enqueued by `producer`, claimed or not.
    async fn clear_producer(&self, producer: &str) -> QueueResult<u64>;

    /// Number of entries currently held for `producer`, claimed ones included.
    async fn len(&self, producer: &str) -> QueueResult<u64>;

    /// Check if the queue holds no entries for `producer`.
    async fn is_empty(&self, producer: &str) -> QueueResult<bool> {
        Ok(self.len(producer).await? == 0)
    }
}

/// Compute the lease expiry for a claim made at `now`.
pub(crate) fn lease_expiry(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(lease)
        .ok()
        .and_then(|lease| now.checked_add_signed(lease))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
