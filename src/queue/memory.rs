use std::{collections::VecDeque, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    error::QueueResult,
    traits::{QueueEntry, QueueItem, WorkQueue, lease_expiry, truncate_to_millis},
};

/// In-memory work queue.
///
/// Entries live in insertion order; nothing survives a restart.
#[derive(Default)]
pub struct MemoryQueue {
    entries: Mutex<VecDeque<QueueEntry>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the queued items for `producer`, in delivery order.
    pub async fn items(&self, producer: &str) -> Vec<QueueItem> {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|e| e.producer == producer)
            .map(|e| e.item)
            .collect()
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn enqueue(&self, producer: &str, item: QueueItem) -> QueueResult<Uuid> {
        let entry = QueueEntry::new(producer, item);
        let id = entry.id;
        self.entries.lock().await.push_back(entry);
        Ok(id)
    }

    async fn claim(&self, producer: &str, lease: Duration) -> QueueResult<Option<QueueEntry>> {
        let now = truncate_to_millis(Utc::now());
        let mut entries = self.entries.lock().await;

        let claimed = entries
            .iter_mut()
            .find(|e| e.producer == producer && e.is_claimable(now))
            .map(|entry| {
                entry.attempts += 1;
                entry.claimed_until = Some(lease_expiry(now, lease));
                entry.clone()
            });

        Ok(claimed)
    }

    async fn complete(&self, id: Uuid) -> QueueResult<bool> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|e| e.id != id);
        Ok(entries.len() < before)
    }

    async fn release(&self, id: Uuid, delay: Duration) -> QueueResult<bool> {
        let mut entries = self.entries.lock().await;
        match entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.claimed_until = Some(lease_expiry(truncate_to_millis(Utc::now()), delay));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn clear_producer(&self, producer: &str) -> QueueResult<u64> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|e| e.producer != producer);
        Ok((before - entries.len()) as u64)
    }

    async fn len(&self, producer: &str) -> QueueResult<u64> {
        let entries = self.entries.lock().await;
        Ok(entries.iter().filter(|e| e.producer == producer).count() as u64)
    }
}
