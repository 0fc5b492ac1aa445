//! Shared SQLite pool for the job store and the broker queue.
//!
//! Both live in one database file so a job row and its queue entry commit
//! against the same storage and reconciliation sees one consistent picture.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;

/// Open (or create) the database at `path` with WAL journaling.
pub async fn open_pool(path: &Path) -> Result<Pool<Sqlite>> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create state dir: {}", parent.display()))?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
        .with_context(|| format!("open database: {}", path.display()))?;

    Ok(pool)
}

/// Single-connection in-memory pool for tests (a second connection would see
/// a different empty database).
pub async fn open_memory_pool() -> Result<Pool<Sqlite>> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    Ok(pool)
}
