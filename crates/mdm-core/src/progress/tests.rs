use super::*;
use crate::events::EventBus;
use crate::job_store::{Job, JobKind, JobStatus, JobStore, SubmitOptions};
use std::time::Duration;

async fn setup(throttle: Duration) -> (ProgressPipeline, JobStore, EventBus, String) {
    let pool = crate::db::open_memory_pool().await.unwrap();
    let store = JobStore::new(pool).await.unwrap();
    let bus = EventBus::default();
    let job = Job::new_queued(
        "https://example.com/clip.bin".to_string(),
        JobKind::File,
        SubmitOptions::default(),
    );
    store.insert(&job).await.unwrap();
    store
        .update_status(&job.id, JobStatus::Running, None, None)
        .await
        .unwrap();
    let pipeline = ProgressPipeline::new(store.clone(), bus.clone(), throttle);
    (pipeline, store, bus, job.id)
}

fn delta(progress: f64) -> ProgressUpdate {
    ProgressUpdate {
        progress: Some(progress),
        stage: Some(JobStage::Download),
        ..Default::default()
    }
}

#[tokio::test]
async fn every_delta_reaches_subscribers_store_writes_are_throttled() {
    let (pipeline, store, bus, job_id) = setup(Duration::from_millis(200)).await;
    let mut sub = bus.subscribe(&job_room(&job_id));

    // 100 deltas in well under a second.
    for i in 1..=100 {
        pipeline.on_progress(&job_id, delta(i as f64 * 0.9));
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    // Let the last pending flush fire.
    tokio::time::sleep(Duration::from_millis(250)).await;

    // The live stream is complete and ordered.
    let mut seen = Vec::new();
    while let Some(envelope) = sub.try_recv() {
        if let JobEvent::Progress(p) = envelope.event {
            seen.push(p.progress);
        }
    }
    assert_eq!(seen.len(), 100, "fanout is never throttled");
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "publish order preserved");

    // ~500ms of activity at 200ms throttle: a handful of writes, not 100.
    let writes = pipeline.progress_write_count();
    assert!(writes >= 1, "at least one flush");
    assert!(writes <= 6, "writes are throttled, got {}", writes);

    // The store converged on the newest delta.
    let job = store.get(&job_id).await.unwrap();
    assert_eq!(job.progress, 90.0);
}

#[tokio::test]
async fn terminal_event_discards_buffered_delta() {
    // Throttle long enough that no flush can fire on its own.
    let (pipeline, store, bus, job_id) = setup(Duration::from_secs(10)).await;
    let mut sub = bus.subscribe(&job_room(&job_id));

    for i in 1..=50 {
        pipeline.on_progress(&job_id, delta(i as f64));
    }
    pipeline
        .on_completed(&job_id, "clip.bin", "/data/x/clip.bin", 4096)
        .await
        .unwrap();

    // Exactly one store write happened: the terminal one.
    assert_eq!(pipeline.progress_write_count(), 0);
    let job = store.get(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100.0);

    // No flush fires afterwards either.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(pipeline.progress_write_count(), 0);

    // Subscribers got all 50 deltas and then the terminal event, last.
    let mut events = Vec::new();
    while let Some(envelope) = sub.try_recv() {
        events.push(envelope.event);
    }
    assert_eq!(events.len(), 51);
    assert!(matches!(events.last(), Some(JobEvent::Completed(_))));
    assert!(events[..50].iter().all(|e| matches!(e, JobEvent::Progress(_))));
}

#[tokio::test]
async fn failed_terminal_carries_code_and_cancels_flush() {
    let (pipeline, store, bus, job_id) = setup(Duration::from_secs(10)).await;
    let mut sub = bus.subscribe(&job_room(&job_id));

    pipeline.on_progress(&job_id, delta(33.0));
    pipeline
        .on_failed(&job_id, ErrorCode::NetworkError, "connection reset")
        .await
        .unwrap();

    let job = store.get(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_code, Some(ErrorCode::NetworkError));
    assert_eq!(job.error_message.as_deref(), Some("connection reset"));
    assert_eq!(pipeline.progress_write_count(), 0);

    let mut last = None;
    while let Some(envelope) = sub.try_recv() {
        last = Some(envelope.event);
    }
    match last {
        Some(JobEvent::Failed(p)) => {
            assert_eq!(p.error_code, ErrorCode::NetworkError);
            assert_eq!(p.message, "connection reset");
        }
        other => panic!("expected failed event last, got {:?}", other),
    }
}

#[tokio::test]
async fn flush_persists_latest_buffered_delta() {
    let (pipeline, store, _bus, job_id) = setup(Duration::from_millis(50)).await;

    pipeline.on_progress(&job_id, delta(10.0));
    pipeline.on_progress(&job_id, delta(20.0));
    pipeline.on_progress(&job_id, delta(30.0));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(pipeline.progress_write_count(), 1, "one timer, one write");
    assert_eq!(store.get(&job_id).await.unwrap().progress, 30.0);
}

#[tokio::test]
async fn job_update_writes_status_and_publishes() {
    let (pipeline, store, bus, job_id) = setup(Duration::from_millis(50)).await;
    let mut sub = bus.subscribe(&job_room(&job_id));

    pipeline
        .on_job_update(&job_id, Some(JobStatus::Paused), None, None)
        .await
        .unwrap();

    assert_eq!(store.get(&job_id).await.unwrap().status, JobStatus::Paused);
    match sub.try_recv().map(|e| e.event) {
        Some(JobEvent::JobUpdate(p)) => assert_eq!(p.status.as_deref(), Some("paused")),
        other => panic!("expected job-update, got {:?}", other),
    }
}

#[tokio::test]
async fn per_job_throttling_is_independent() {
    let pool = crate::db::open_memory_pool().await.unwrap();
    let store = JobStore::new(pool).await.unwrap();
    let bus = EventBus::default();
    let pipeline = ProgressPipeline::new(store.clone(), bus.clone(), Duration::from_millis(50));

    let mut ids = Vec::new();
    for i in 0..3 {
        let job = Job::new_queued(
            format!("https://example.com/{}.bin", i),
            JobKind::File,
            SubmitOptions::default(),
        );
        store.insert(&job).await.unwrap();
        store
            .update_status(&job.id, JobStatus::Running, None, None)
            .await
            .unwrap();
        ids.push(job.id);
    }

    for id in &ids {
        pipeline.on_progress(id, delta(40.0));
    }
    tokio::time::sleep(Duration::from_millis(120)).await;

    assert_eq!(pipeline.progress_write_count(), 3, "one flush per job");
    for id in &ids {
        assert_eq!(store.get(id).await.unwrap().progress, 40.0);
    }
}
