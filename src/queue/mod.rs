//! Work queue used to defer revision deletion to the queue runner.

#[cfg(feature = "database-sqlite")]
mod database;
mod error;
mod memory;
pub mod traits;

use std::sync::Arc;

#[cfg(feature = "database-sqlite")]
pub use database::DatabaseQueue;
pub use error::{QueueError, QueueResult};
pub use memory::MemoryQueue;
pub use traits::{QueueEntry, QueueItem, WorkQueue};

use crate::{
    config::{QueueBackend, QueueConfig},
    db::{DbPool, DbPoolRef},
};

/// Create the work queue described by `config`.
///
/// The database backend shares the revision store's connection pool.
pub fn create_queue(config: &QueueConfig, db: &DbPool) -> QueueResult<Arc<dyn WorkQueue>> {
    let queue: Arc<dyn WorkQueue> = match config.backend {
        QueueBackend::Memory => Arc::new(MemoryQueue::new()),
        QueueBackend::Database => match db.pool() {
            #[cfg(feature = "database-sqlite")]
            DbPoolRef::Sqlite(pool) => Arc::new(DatabaseQueue::new(pool.clone())),
            _ => {
                return Err(QueueError::NotConfigured);
            }
        },
    };

    Ok(queue)
}
