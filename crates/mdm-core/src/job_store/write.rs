//! Job write operations: insert, progress, status transitions, terminal
//! writes, retry reset.
//!
//! Every status change is validated against the state machine inside a
//! transaction, so an illegal transition can never land even if two control
//! paths race.

use sqlx::{Row, Sqlite, Transaction};

use super::types::{Job, JobStatus, ProgressUpdate};
use super::{JobStore, StoreError};
use crate::error::ErrorCode;
use crate::util::unix_timestamp;

impl JobStore {
    /// Insert a new job row. Fails with `Conflict` when the id is taken.
    pub async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        let options_json = serde_json::to_string(&job.options)?;
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (
                id, url, kind, status, stage, progress, speed, eta,
                total_bytes, filename, output_path, error_code, error_message,
                options, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
        )
        .bind(&job.id)
        .bind(&job.url)
        .bind(job.kind.as_str())
        .bind(job.status.as_str())
        .bind(job.stage.map(|s| s.as_str()))
        .bind(job.progress.clamp(0.0, 100.0))
        .bind(&job.speed)
        .bind(job.eta_secs)
        .bind(job.total_bytes)
        .bind(&job.filename)
        .bind(&job.output_path)
        .bind(job.error_code.map(|c| c.as_str()))
        .bind(&job.error_message)
        .bind(options_json)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                self.bump_metrics_total().await;
                Ok(())
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::Conflict(job.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write progress-class fields only. Progress is clamped to [0, 100] and
    /// the row is left untouched if the job is already terminal, so a late
    /// flush can never resurrect a finished run.
    pub async fn update_progress(
        &self,
        id: &str,
        update: &ProgressUpdate,
    ) -> Result<(), StoreError> {
        let now = unix_timestamp();
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET progress = MAX(progress, COALESCE(?1, progress)),
                stage = COALESCE(?2, stage),
                speed = COALESCE(?3, speed),
                eta = COALESCE(?4, eta),
                total_bytes = COALESCE(?5, total_bytes),
                updated_at = ?6
            WHERE id = ?7
              AND status NOT IN ('completed', 'failed', 'cancelled')
            "#,
        )
        .bind(update.progress.map(|p| p.clamp(0.0, 100.0)))
        .bind(update.stage.map(|s| s.as_str()))
        .bind(&update.speed)
        .bind(update.eta_secs)
        .bind(update.total_bytes)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Either unknown or terminal; only the former is an error.
            self.status_of(id).await?;
        }
        Ok(())
    }

    /// Transition the job's status. Enforces the state machine; `failed`
    /// requires an error code (invariant: failed rows always carry one).
    /// Terminal success must go through `set_completed` instead so the
    /// output fields are set atomically with the status.
    pub async fn update_status(
        &self,
        id: &str,
        status: JobStatus,
        error_code: Option<ErrorCode>,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        if status == JobStatus::Completed {
            return Err(StoreError::Invalid(
                "completed is written via set_completed".to_string(),
            ));
        }
        if status == JobStatus::Failed && error_code.is_none() {
            return Err(StoreError::Invalid(
                "failed requires an error code".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;
        let current = current_status(&mut tx, id).await?;
        if !current.can_transition_to(status) {
            tx.rollback().await?;
            return Err(StoreError::IllegalTransition {
                from: current,
                to: status,
            });
        }

        let now = unix_timestamp();
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?1,
                error_code = ?2,
                error_message = ?3,
                updated_at = ?4
            WHERE id = ?5
            "#,
        )
        .bind(status.as_str())
        .bind(error_code.map(|c| c.as_str()))
        .bind(error_message)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        if status == JobStatus::Failed {
            self.bump_metrics_failed().await;
        }
        Ok(())
    }

    /// Terminal success: status, progress=100, stage=completed, output fields
    /// and cleared errors, all in one write.
    pub async fn set_completed(
        &self,
        id: &str,
        filename: &str,
        output_path: &str,
        size: Option<i64>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let current = current_status(&mut tx, id).await?;
        if !current.can_transition_to(JobStatus::Completed) {
            tx.rollback().await?;
            return Err(StoreError::IllegalTransition {
                from: current,
                to: JobStatus::Completed,
            });
        }

        let now = unix_timestamp();
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed',
                stage = 'completed',
                progress = 100,
                filename = ?1,
                output_path = ?2,
                total_bytes = COALESCE(?3, total_bytes),
                error_code = NULL,
                error_message = NULL,
                updated_at = ?4
            WHERE id = ?5
            "#,
        )
        .bind(filename)
        .bind(output_path)
        .bind(size)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.bump_metrics_completed(size.unwrap_or(0)).await;
        Ok(())
    }

    /// Retry reset: failed/cancelled back to queued with progress, stage,
    /// outputs and error fields cleared. Submission fields are untouched.
    pub async fn reset_for_retry(&self, id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let current = current_status(&mut tx, id).await?;
        if !matches!(current, JobStatus::Failed | JobStatus::Cancelled) {
            tx.rollback().await?;
            return Err(StoreError::IllegalTransition {
                from: current,
                to: JobStatus::Queued,
            });
        }

        let now = unix_timestamp();
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'queued',
                stage = NULL,
                progress = 0,
                speed = NULL,
                eta = NULL,
                filename = NULL,
                output_path = NULL,
                error_code = NULL,
                error_message = NULL,
                updated_at = ?1
            WHERE id = ?2
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Clear progress-class fields for a fresh attempt (broker retry or
    /// pause/resume re-queue). Status is not touched here; the caller owns
    /// that transition.
    pub async fn reset_progress_for_requeue(&self, id: &str) -> Result<(), StoreError> {
        let now = unix_timestamp();
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET progress = 0,
                stage = NULL,
                speed = NULL,
                eta = NULL,
                updated_at = ?1
            WHERE id = ?2
              AND status NOT IN ('completed', 'failed', 'cancelled')
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            self.status_of(id).await?;
        }
        Ok(())
    }

    /// Permanently remove a job row.
    pub async fn remove(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query(r#"DELETE FROM jobs WHERE id = ?1"#)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn bump_metrics_total(&self) {
        let result = sqlx::query(
            r#"
            INSERT INTO metrics (date, jobs_total) VALUES (date('now'), 1)
            ON CONFLICT(date) DO UPDATE SET jobs_total = jobs_total + 1
            "#,
        )
        .execute(&self.pool)
        .await;
        if let Err(e) = result {
            tracing::warn!("metrics update failed: {}", e);
        }
    }

    async fn bump_metrics_completed(&self, bytes: i64) {
        let result = sqlx::query(
            r#"
            INSERT INTO metrics (date, jobs_completed, bytes_total)
            VALUES (date('now'), 1, ?1)
            ON CONFLICT(date) DO UPDATE SET
                jobs_completed = jobs_completed + 1,
                bytes_total = bytes_total + ?1
            "#,
        )
        .bind(bytes.max(0))
        .execute(&self.pool)
        .await;
        if let Err(e) = result {
            tracing::warn!("metrics update failed: {}", e);
        }
    }

    async fn bump_metrics_failed(&self) {
        let result = sqlx::query(
            r#"
            INSERT INTO metrics (date, jobs_failed) VALUES (date('now'), 1)
            ON CONFLICT(date) DO UPDATE SET jobs_failed = jobs_failed + 1
            "#,
        )
        .execute(&self.pool)
        .await;
        if let Err(e) = result {
            tracing::warn!("metrics update failed: {}", e);
        }
    }
}

async fn current_status(
    tx: &mut Transaction<'_, Sqlite>,
    id: &str,
) -> Result<JobStatus, StoreError> {
    let row = sqlx::query(r#"SELECT status FROM jobs WHERE id = ?1"#)
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;
    let row = row.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
    let status: String = row.get("status");
    JobStatus::parse(&status)
        .ok_or_else(|| StoreError::Invalid(format!("corrupt status for {}: {}", id, status)))
}
