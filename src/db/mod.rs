mod migrations;
mod models;
mod queries;

pub use models::*;
pub use queries::*;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use tracing::info;

/// Timestamp format shared with SQLite's `datetime()`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Connections kept beyond one per render, for cache hits that only read.
const LOOKUP_CONNECTIONS: u32 = 4;

/// Format a timestamp the way the `screenshots` table stores it.
#[must_use]
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Pool size for a service running `render_concurrency` renders at once.
///
/// Each finishing render writes its record (insert, then status update), and
/// cache hits need a connection for their lookup meanwhile.
#[must_use]
pub fn pool_size_for(render_concurrency: usize) -> u32 {
    u32::try_from(render_concurrency)
        .unwrap_or(u32::MAX)
        .saturating_add(LOOKUP_CONNECTIONS)
}

#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open the database with a pool sized for the default render concurrency.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails or migrations fail.
    pub async fn new(path: &Path) -> Result<Self> {
        Self::connect(
            path,
            pool_size_for(crate::renderer::scheduler::DEFAULT_RENDER_CONCURRENCY),
        )
        .await
    }

    /// Open the database at `path` with up to `max_connections` connections,
    /// then migrate it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened for writing or
    /// migrations fail.
    pub async fn connect(path: &Path, max_connections: u32) -> Result<Self> {
        // SQLite has one writer at a time. WAL lets lookups proceed during a
        // write, and concurrent record writes queue on the busy timeout
        // instead of failing with SQLITE_BUSY.
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open SQLite database at {}", path.display()))?;

        let db = Self { pool };
        migrations::run(&db.pool).await?;
        db.check_writable(path).await?;
        info!(path = %path.display(), max_connections, "Database ready");

        Ok(db)
    }

    /// Take the write lock once so a read-only mount fails at startup rather
    /// than on the first capture.
    async fn check_writable(&self, path: &Path) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .with_context(|| format!("SQLite database at {} is not writable", path.display()))?;
        sqlx::query("ROLLBACK")
            .execute(&mut *conn)
            .await
            .context("Failed to release SQLite write lock")?;
        Ok(())
    }

    /// Get a reference to the connection pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
