//! Durable projection of every job (SQLite via sqlx).
//!
//! One row per submission. The orchestrator process is the sole writer;
//! workers emit events that the progress pipeline turns into the single
//! stream of store writes, so no per-field transactions are needed. The
//! write path enforces the job state machine and the terminal-state
//! invariants.

mod read;
mod types;
mod write;

#[cfg(test)]
mod tests;

pub use types::{
    new_job_id, HeaderOptions, Job, JobFilter, JobId, JobKind, JobStage, JobStatus,
    PinterestOptions, ProgressUpdate, SubmitOptions, TranscodeCodec, TranscodeContainer,
    TranscodeOptions, TwitterMediaType, TwitterOptions,
};

use sqlx::{Pool, Sqlite};

/// Typed store failures surfaced to the orchestrator contract.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job already exists: {0}")]
    Conflict(JobId),
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("illegal transition: {from:?} -> {to:?}")]
    IllegalTransition { from: JobStatus, to: JobStatus },
    #[error("invalid store call: {0}")]
    Invalid(String),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error("options encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Handle to the jobs table. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct JobStore {
    pub(crate) pool: Pool<Sqlite>,
}

impl JobStore {
    /// Wrap an open pool and ensure the schema exists.
    pub async fn new(pool: Pool<Sqlite>) -> Result<Self, StoreError> {
        let store = JobStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                kind TEXT NOT NULL,
                status TEXT NOT NULL,
                stage TEXT,
                progress REAL NOT NULL DEFAULT 0,
                speed TEXT,
                eta INTEGER,
                total_bytes INTEGER,
                filename TEXT,
                output_path TEXT,
                error_code TEXT,
                error_message TEXT,
                options TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_jobs_status_created
            ON jobs (status, created_at DESC);
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Daily counters, bumped on insert and on terminal writes.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS metrics (
                date TEXT PRIMARY KEY,
                jobs_total INTEGER NOT NULL DEFAULT 0,
                jobs_completed INTEGER NOT NULL DEFAULT 0,
                jobs_failed INTEGER NOT NULL DEFAULT 0,
                bytes_total INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

