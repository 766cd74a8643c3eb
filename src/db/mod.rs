mod error;
pub mod memory;
pub mod repos;
#[cfg(feature = "database-sqlite")]
pub mod sqlite;

#[cfg(all(test, feature = "database-sqlite"))]
pub mod tests;

use std::sync::Arc;

pub use error::{DbError, DbResult};
pub use memory::MemoryRevisionRepo;
pub use repos::*;

use crate::config::DatabaseConfig;

enum PoolStorage {
    Memory,
    #[cfg(feature = "database-sqlite")]
    Sqlite(sqlx::SqlitePool),
}

/// Borrowed reference to the underlying database pool.
/// Used by components that share the connection, such as the SQLite queue.
pub enum DbPoolRef<'a> {
    Memory,
    #[cfg(feature = "database-sqlite")]
    Sqlite(&'a sqlx::SqlitePool),
    #[cfg(not(feature = "database-sqlite"))]
    _Phantom(std::marker::PhantomData<&'a ()>),
}

/// Handle to the revision store.
///
/// The repository is created once at construction time and shared.
pub struct DbPool {
    inner: PoolStorage,
    revisions: Arc<dyn RevisionRepo>,
}

impl DbPool {
    /// Create a DbPool backed by the in-memory store.
    pub fn in_memory() -> Self {
        DbPool {
            inner: PoolStorage::Memory,
            revisions: Arc::new(MemoryRevisionRepo::new()),
        }
    }

    /// Create a DbPool from an existing SQLite pool.
    /// Primarily useful for testing.
    #[cfg(feature = "database-sqlite")]
    pub fn from_sqlite(pool: sqlx::SqlitePool) -> Self {
        DbPool {
            revisions: Arc::new(sqlite::SqliteRevisionRepo::new(pool.clone())),
            inner: PoolStorage::Sqlite(pool),
        }
    }

    /// Create a database pool from configuration
    pub async fn from_config(config: &DatabaseConfig) -> DbResult<Self> {
        match config {
            DatabaseConfig::None => Err(DbError::NotConfigured),
            DatabaseConfig::Memory => Ok(Self::in_memory()),
            #[cfg(feature = "database-sqlite")]
            DatabaseConfig::Sqlite(cfg) => {
                let pool = sqlx::sqlite::SqlitePoolOptions::new()
                    .max_connections(cfg.max_connections)
                    .connect_with(
                        sqlx::sqlite::SqliteConnectOptions::new()
                            .filename(&cfg.path)
                            .create_if_missing(cfg.create_if_missing)
                            .journal_mode(if cfg.wal_mode {
                                sqlx::sqlite::SqliteJournalMode::Wal
                            } else {
                                sqlx::sqlite::SqliteJournalMode::Delete
                            })
                            .busy_timeout(std::time::Duration::from_millis(cfg.busy_timeout_ms)),
                    )
                    .await?;

                let db = Self::from_sqlite(pool);
                if cfg.run_migrations {
                    db.run_migrations().await?;
                }
                Ok(db)
            }
        }
    }

    /// Run database migrations. A no-op for the in-memory store.
    pub async fn run_migrations(&self) -> DbResult<()> {
        match &self.inner {
            PoolStorage::Memory => Ok(()),
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(pool) => {
                tracing::info!("Running SQLite migrations");
                sqlx::migrate!("./migrations_sqlx/sqlite").run(pool).await?;
                tracing::info!("SQLite migrations completed successfully");
                Ok(())
            }
        }
    }

    /// Get the underlying pool.
    pub fn pool(&self) -> DbPoolRef<'_> {
        match &self.inner {
            PoolStorage::Memory => DbPoolRef::Memory,
            #[cfg(feature = "database-sqlite")]
            PoolStorage::Sqlite(pool) => DbPoolRef::Sqlite(pool),
        }
    }

    /// Get revision repository
    pub fn revisions(&self) -> Arc<dyn RevisionRepo> {
        Arc::clone(&self.revisions)
    }
}
