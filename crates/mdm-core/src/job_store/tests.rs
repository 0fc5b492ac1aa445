use super::*;
use crate::error::ErrorCode;
use crate::job_store::types::{Job, JobFilter, JobKind, JobStage, JobStatus, ProgressUpdate, SubmitOptions};

/// Open an in-memory store for tests (no disk I/O).
async fn open_memory() -> JobStore {
    let pool = crate::db::open_memory_pool().await.unwrap();
    JobStore::new(pool).await.unwrap()
}

fn file_job(url: &str) -> Job {
    Job::new_queued(url.to_string(), JobKind::File, SubmitOptions::default())
}

#[tokio::test]
async fn insert_get_roundtrip() {
    let store = open_memory().await;
    let job = file_job("https://example.com/file.bin");
    store.insert(&job).await.unwrap();

    let got = store.get(&job.id).await.unwrap();
    assert_eq!(got.id, job.id);
    assert_eq!(got.url, job.url);
    assert_eq!(got.kind, JobKind::File);
    assert_eq!(got.status, JobStatus::Queued);
    assert_eq!(got.progress, 0.0);
}

#[tokio::test]
async fn duplicate_id_conflicts() {
    let store = open_memory().await;
    let job = file_job("https://example.com/file.bin");
    store.insert(&job).await.unwrap();
    let err = store.insert(&job).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
}

#[tokio::test]
async fn get_unknown_is_not_found() {
    let store = open_memory().await;
    let err = store.get("nope").await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn progress_updates_touch_only_progress_fields() {
    let store = open_memory().await;
    let job = file_job("https://example.com/file.bin");
    store.insert(&job).await.unwrap();
    store
        .update_status(&job.id, JobStatus::Running, None, None)
        .await
        .unwrap();

    store
        .update_progress(
            &job.id,
            &ProgressUpdate {
                progress: Some(42.5),
                stage: Some(JobStage::Download),
                speed: Some("2.0 MB/s".to_string()),
                eta_secs: Some(30),
                total_bytes: Some(10_485_760),
            },
        )
        .await
        .unwrap();

    let got = store.get(&job.id).await.unwrap();
    assert_eq!(got.status, JobStatus::Running, "progress write must not alter status");
    assert_eq!(got.progress, 42.5);
    assert_eq!(got.stage, Some(JobStage::Download));
    assert_eq!(got.speed.as_deref(), Some("2.0 MB/s"));
    assert_eq!(got.eta_secs, Some(30));
    assert_eq!(got.total_bytes, Some(10_485_760));
}

#[tokio::test]
async fn progress_is_clamped_and_monotone() {
    let store = open_memory().await;
    let job = file_job("https://example.com/file.bin");
    store.insert(&job).await.unwrap();
    store
        .update_status(&job.id, JobStatus::Running, None, None)
        .await
        .unwrap();

    store
        .update_progress(
            &job.id,
            &ProgressUpdate {
                progress: Some(250.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(store.get(&job.id).await.unwrap().progress, 100.0);

    // A lower value never rewinds the row within a run.
    store
        .update_progress(
            &job.id,
            &ProgressUpdate {
                progress: Some(10.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(store.get(&job.id).await.unwrap().progress, 100.0);
}

#[tokio::test]
async fn progress_after_terminal_is_ignored() {
    let store = open_memory().await;
    let job = file_job("https://example.com/file.bin");
    store.insert(&job).await.unwrap();
    store
        .update_status(&job.id, JobStatus::Running, None, None)
        .await
        .unwrap();
    store
        .set_completed(&job.id, "file.bin", "/data/x/file.bin", Some(100))
        .await
        .unwrap();

    store
        .update_progress(
            &job.id,
            &ProgressUpdate {
                progress: Some(55.0),
                stage: Some(JobStage::Download),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let got = store.get(&job.id).await.unwrap();
    assert_eq!(got.progress, 100.0);
    assert_eq!(got.stage, Some(JobStage::Completed));
}

#[tokio::test]
async fn completed_invariants_hold() {
    let store = open_memory().await;
    let job = file_job("https://example.com/file.bin");
    store.insert(&job).await.unwrap();
    store
        .update_status(&job.id, JobStatus::Running, None, None)
        .await
        .unwrap();
    store
        .update_status(
            &job.id,
            JobStatus::Failed,
            Some(ErrorCode::NetworkError),
            Some("reset by peer"),
        )
        .await
        .unwrap();
    store.reset_for_retry(&job.id).await.unwrap();
    store
        .update_status(&job.id, JobStatus::Running, None, None)
        .await
        .unwrap();
    store
        .set_completed(&job.id, "file.bin", "/data/x/file.bin", Some(10))
        .await
        .unwrap();

    let got = store.get(&job.id).await.unwrap();
    assert_eq!(got.status, JobStatus::Completed);
    assert_eq!(got.progress, 100.0);
    assert_eq!(got.stage, Some(JobStage::Completed));
    assert_eq!(got.output_path.as_deref(), Some("/data/x/file.bin"));
    assert!(got.error_code.is_none(), "completed clears error fields");
    assert!(got.error_message.is_none());
}

#[tokio::test]
async fn failed_requires_error_code() {
    let store = open_memory().await;
    let job = file_job("https://example.com/file.bin");
    store.insert(&job).await.unwrap();
    store
        .update_status(&job.id, JobStatus::Running, None, None)
        .await
        .unwrap();

    let err = store
        .update_status(&job.id, JobStatus::Failed, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Invalid(_)));
}

#[tokio::test]
async fn illegal_transitions_rejected() {
    let store = open_memory().await;
    let job = file_job("https://example.com/file.bin");
    store.insert(&job).await.unwrap();

    // queued -> paused is not an edge.
    let err = store
        .update_status(&job.id, JobStatus::Paused, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::IllegalTransition { .. }));

    // Terminal states are sticky except through retry.
    store
        .update_status(&job.id, JobStatus::Cancelled, None, None)
        .await
        .unwrap();
    let err = store
        .update_status(&job.id, JobStatus::Running, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::IllegalTransition { .. }));
}

#[tokio::test]
async fn retry_resets_progress_and_errors() {
    let store = open_memory().await;
    let job = file_job("https://example.com/file.bin");
    store.insert(&job).await.unwrap();
    store
        .update_status(&job.id, JobStatus::Running, None, None)
        .await
        .unwrap();
    store
        .update_progress(
            &job.id,
            &ProgressUpdate {
                progress: Some(60.0),
                stage: Some(JobStage::Download),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    store
        .update_status(
            &job.id,
            JobStatus::Failed,
            Some(ErrorCode::NetworkError),
            Some("timeout"),
        )
        .await
        .unwrap();

    store.reset_for_retry(&job.id).await.unwrap();
    let got = store.get(&job.id).await.unwrap();
    assert_eq!(got.status, JobStatus::Queued);
    assert_eq!(got.progress, 0.0);
    assert!(got.stage.is_none());
    assert!(got.error_code.is_none());
    assert!(got.error_message.is_none());

    // Retry of a non-terminal job is illegal.
    let err = store.reset_for_retry(&job.id).await.unwrap_err();
    assert!(matches!(err, StoreError::IllegalTransition { .. }));
}

#[tokio::test]
async fn requeue_reset_clears_progress_but_not_status() {
    let store = open_memory().await;
    let job = file_job("https://example.com/file.bin");
    store.insert(&job).await.unwrap();
    store
        .update_status(&job.id, JobStatus::Running, None, None)
        .await
        .unwrap();
    store
        .update_progress(
            &job.id,
            &ProgressUpdate {
                progress: Some(80.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    store
        .update_status(&job.id, JobStatus::Queued, None, None)
        .await
        .unwrap();
    store.reset_progress_for_requeue(&job.id).await.unwrap();

    let got = store.get(&job.id).await.unwrap();
    assert_eq!(got.status, JobStatus::Queued);
    assert_eq!(got.progress, 0.0);
}

#[tokio::test]
async fn list_filters_and_paginates() {
    let store = open_memory().await;
    for i in 0..5 {
        let mut job = file_job(&format!("https://example.com/file-{}.bin", i));
        // Distinct created_at so ordering is deterministic.
        job.created_at += i;
        store.insert(&job).await.unwrap();
    }
    let mut yt = Job::new_queued(
        "https://youtube.com/watch?v=abc".to_string(),
        JobKind::Youtube,
        SubmitOptions::default(),
    );
    yt.created_at += 100;
    store.insert(&yt).await.unwrap();

    let (all, total) = store.list(&JobFilter::default()).await.unwrap();
    assert_eq!(total, 6);
    assert_eq!(all.len(), 6);
    assert_eq!(all[0].id, yt.id, "newest first");

    let (files, total) = store
        .list(&JobFilter {
            kind: Some(JobKind::File),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(total, 5);
    assert!(files.iter().all(|j| j.kind == JobKind::File));

    let (page, total) = store
        .list(&JobFilter {
            kind: Some(JobKind::File),
            offset: 2,
            limit: 2,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(total, 5, "total counts all matches, not the page");
    assert_eq!(page.len(), 2);

    let (found, _) = store
        .list(&JobFilter {
            search: Some("FILE-3".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(found.len(), 1, "search is case-insensitive");
    assert!(found[0].url.contains("file-3"));
}

#[tokio::test]
async fn remove_and_not_found() {
    let store = open_memory().await;
    let job = file_job("https://example.com/file.bin");
    store.insert(&job).await.unwrap();
    store.remove(&job.id).await.unwrap();
    assert!(matches!(
        store.remove(&job.id).await.unwrap_err(),
        StoreError::NotFound(_)
    ));
}

#[tokio::test]
async fn metrics_count_terminal_outcomes() {
    let store = open_memory().await;
    let a = file_job("https://example.com/a.bin");
    let b = file_job("https://example.com/b.bin");
    store.insert(&a).await.unwrap();
    store.insert(&b).await.unwrap();
    store
        .update_status(&a.id, JobStatus::Running, None, None)
        .await
        .unwrap();
    store
        .set_completed(&a.id, "a.bin", "/data/a/a.bin", Some(2048))
        .await
        .unwrap();
    store
        .update_status(&b.id, JobStatus::Running, None, None)
        .await
        .unwrap();
    store
        .update_status(&b.id, JobStatus::Failed, Some(ErrorCode::Timeout), Some("deadline"))
        .await
        .unwrap();

    // Today's row aggregates both outcomes.
    let today = {
        let row = sqlx::query("SELECT date('now') AS d")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        use sqlx::Row;
        let d: String = row.get("d");
        d
    };
    let (total, completed, failed, bytes) = store.metrics_for(&today).await.unwrap().unwrap();
    assert_eq!(total, 2);
    assert_eq!(completed, 1);
    assert_eq!(failed, 1);
    assert_eq!(bytes, 2048);
}
