use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use thiserror::Error;

use crate::repository::Storage;

mod attempt_repo;
mod curriculum_repo;
mod learner_repo;
mod mapping;
mod migrate;
mod progress_repo;
mod session_repo;

const MAX_CONNECTIONS: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Implements every repository contract plus the atomic [`SessionStore`]
/// over one connection pool.
///
/// [`SessionStore`]: crate::repository::SessionStore
#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SqliteInitError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Connection settings shared by file and in-memory databases. In-memory
/// databases skip WAL and keep one connection open so the shared cache
/// survives between checkouts.
fn connect_options(database_url: &str) -> Result<(SqliteConnectOptions, bool), SqliteInitError> {
    let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
    let mut options = SqliteConnectOptions::from_str(database_url)?
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT)
        .create_if_missing(true);
    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }
    Ok((options, in_memory))
}

impl SqliteRepository {
    /// Open a pool on `database_url` with foreign keys enforced.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` for unparsable URLs or failed connections.
    pub async fn connect(database_url: &str) -> Result<Self, SqliteInitError> {
        let (options, in_memory) = connect_options(database_url)?;
        let mut pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(BUSY_TIMEOUT);
        if in_memory {
            pool = pool.min_connections(1).idle_timeout(None).max_lifetime(None);
        }
        let pool = pool.connect_with(options).await?;
        Ok(Self { pool })
    }

    /// Bring the schema up to the latest version.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if migration queries fail.
    pub async fn migrate(&self) -> Result<(), SqliteInitError> {
        migrate::run_migrations(&self.pool).await
    }
}

impl Storage {
    /// Build a `Storage` backed by `SQLite`.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if connection or migrations cannot be
    /// completed.
    pub async fn sqlite(database_url: &str) -> Result<Self, SqliteInitError> {
        let repo = SqliteRepository::connect(database_url).await?;
        repo.migrate().await?;
        Ok(Self {
            learners: Arc::new(repo.clone()),
            curriculum: Arc::new(repo.clone()),
            progress: Arc::new(repo.clone()),
            attempts: Arc::new(repo.clone()),
            sessions: Arc::new(repo),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SqliteRepository>();
    }

    #[test]
    fn memory_urls_are_detected() {
        assert!(connect_options("sqlite::memory:").unwrap().1);
        assert!(
            connect_options("sqlite:file:trainer_opts?mode=memory&cache=shared")
                .unwrap()
                .1
        );
        assert!(!connect_options("sqlite:///tmp/trainer.sqlite3").unwrap().1);
    }

    #[tokio::test]
    async fn connections_enforce_foreign_keys() {
        let repo = SqliteRepository::connect("sqlite:file:trainer_fk?mode=memory&cache=shared")
            .await
            .unwrap();
        let enabled: i64 = sqlx::query_scalar("PRAGMA foreign_keys;")
            .fetch_one(&repo.pool)
            .await
            .unwrap();
        assert_eq!(enabled, 1);
    }
}
