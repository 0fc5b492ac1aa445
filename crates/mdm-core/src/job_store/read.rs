//! Job read operations: get, list, reconciliation queries.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::types::{Job, JobFilter, JobKind, JobStage, JobStatus, SubmitOptions};
use super::{JobStore, StoreError};
use crate::error::ErrorCode;

pub(super) fn row_to_job(row: &SqliteRow) -> Result<Job, StoreError> {
    let options_json: String = row.get("options");
    let options: SubmitOptions = serde_json::from_str(&options_json)?;
    let kind: String = row.get("kind");
    let status: String = row.get("status");
    let stage: Option<String> = row.get("stage");
    let error_code: Option<String> = row.get("error_code");

    Ok(Job {
        id: row.get("id"),
        url: row.get("url"),
        kind: JobKind::parse(&kind).unwrap_or(JobKind::Auto),
        status: JobStatus::parse(&status).unwrap_or(JobStatus::Failed),
        stage: stage.as_deref().and_then(JobStage::parse),
        progress: row.get("progress"),
        speed: row.get("speed"),
        eta_secs: row.get("eta"),
        total_bytes: row.get("total_bytes"),
        filename: row.get("filename"),
        output_path: row.get("output_path"),
        error_code: error_code.as_deref().map(ErrorCode::parse),
        error_message: row.get("error_message"),
        options,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

impl JobStore {
    /// Fetch one job.
    pub async fn get(&self, id: &str) -> Result<Job, StoreError> {
        let row = sqlx::query(r#"SELECT * FROM jobs WHERE id = ?1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => row_to_job(&row),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    /// Filtered page plus the total match count, newest first.
    pub async fn list(&self, filter: &JobFilter) -> Result<(Vec<Job>, i64), StoreError> {
        let mut conditions: Vec<&str> = Vec::new();
        if filter.status.is_some() {
            conditions.push("status = ?");
        }
        if filter.kind.is_some() {
            conditions.push("kind = ?");
        }
        if filter.search.is_some() {
            conditions.push("(LOWER(url) LIKE ? OR LOWER(COALESCE(filename, '')) LIKE ?)");
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let search_pattern = filter
            .search
            .as_ref()
            .map(|s| format!("%{}%", s.to_lowercase()));

        let count_sql = format!("SELECT COUNT(*) AS n FROM jobs {}", where_clause);
        let mut count_query = sqlx::query(&count_sql);
        if let Some(status) = filter.status {
            count_query = count_query.bind(status.as_str());
        }
        if let Some(kind) = filter.kind {
            count_query = count_query.bind(kind.as_str());
        }
        if let Some(ref pattern) = search_pattern {
            count_query = count_query.bind(pattern).bind(pattern);
        }
        let total: i64 = count_query.fetch_one(&self.pool).await?.get("n");

        let limit = if filter.limit > 0 { filter.limit } else { -1 };
        let page_sql = format!(
            "SELECT * FROM jobs {} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            where_clause
        );
        let mut page_query = sqlx::query(&page_sql);
        if let Some(status) = filter.status {
            page_query = page_query.bind(status.as_str());
        }
        if let Some(kind) = filter.kind {
            page_query = page_query.bind(kind.as_str());
        }
        if let Some(ref pattern) = search_pattern {
            page_query = page_query.bind(pattern).bind(pattern);
        }
        let rows = page_query
            .bind(limit)
            .bind(filter.offset.max(0))
            .fetch_all(&self.pool)
            .await?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in &rows {
            jobs.push(row_to_job(row)?);
        }
        Ok((jobs, total))
    }

    /// All jobs currently marked running; used by startup reconciliation.
    pub async fn running_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query(r#"SELECT * FROM jobs WHERE status = 'running'"#)
            .fetch_all(&self.pool)
            .await?;
        let mut jobs = Vec::with_capacity(rows.len());
        for row in &rows {
            jobs.push(row_to_job(row)?);
        }
        Ok(jobs)
    }

    /// Current status only, without decoding the whole row.
    pub async fn status_of(&self, id: &str) -> Result<JobStatus, StoreError> {
        let row = sqlx::query(r#"SELECT status FROM jobs WHERE id = ?1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let row = row.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let status: String = row.get("status");
        JobStatus::parse(&status)
            .ok_or_else(|| StoreError::Invalid(format!("corrupt status for {}: {}", id, status)))
    }

    /// Daily metrics row, if any. `date` is `YYYY-MM-DD` (UTC).
    pub async fn metrics_for(&self, date: &str) -> Result<Option<(i64, i64, i64, i64)>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT jobs_total, jobs_completed, jobs_failed, bytes_total
            FROM metrics WHERE date = ?1
            "#,
        )
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| {
            (
                r.get("jobs_total"),
                r.get("jobs_completed"),
                r.get("jobs_failed"),
                r.get("bytes_total"),
            )
        }))
    }
}
