//! Throttled progress pipeline: the single convergence point between live
//! events and durable writes.
//!
//! Every delta is published to the event bus immediately; the store only
//! sees the latest buffered delta once per throttle interval. Terminal
//! events cancel the pending flush and discard its buffer, so the terminal
//! row is never overwritten by a late progress write and store write rate
//! stays bounded per job no matter how chatty an adapter is.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::error::ErrorCode;
use crate::events::{
    job_room, CompletedPayload, EventBus, FailedPayload, JobEvent, JobUpdatePayload, LogLevel,
    LogPayload, ProgressPayload,
};
use crate::job_store::{JobId, JobStage, JobStatus, JobStore, ProgressUpdate};
use crate::util::unix_millis;

struct PendingFlush {
    latest: ProgressUpdate,
    timer: JoinHandle<()>,
}

struct PipelineInner {
    store: JobStore,
    bus: EventBus,
    throttle: Duration,
    pending: Mutex<HashMap<JobId, PendingFlush>>,
    progress_writes: AtomicU64,
}

/// Cheap to clone; all clones share the per-job buffers.
#[derive(Clone)]
pub struct ProgressPipeline {
    inner: Arc<PipelineInner>,
}

impl ProgressPipeline {
    pub fn new(store: JobStore, bus: EventBus, throttle: Duration) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                store,
                bus,
                throttle,
                pending: Mutex::new(HashMap::new()),
                progress_writes: AtomicU64::new(0),
            }),
        }
    }

    /// Number of `update_progress` store writes performed so far (all jobs).
    pub fn progress_write_count(&self) -> u64 {
        self.inner.progress_writes.load(Ordering::Relaxed)
    }

    /// A progress delta from a running job: relay live, persist throttled.
    /// Deltas without a percent (stage changes) go out as coarse job-updates
    /// so the progress stream itself stays numeric and monotone.
    pub fn on_progress(&self, job_id: &str, update: ProgressUpdate) {
        match update.progress {
            Some(progress) => self.inner.bus.publish(
                &job_room(job_id),
                JobEvent::Progress(ProgressPayload {
                    job_id: job_id.to_string(),
                    stage: update
                        .stage
                        .unwrap_or(JobStage::Download)
                        .as_str()
                        .to_string(),
                    progress,
                    speed: update.speed.clone(),
                    eta: update.eta_secs,
                    total_bytes: update.total_bytes,
                }),
            ),
            None => self.publish_job_update(job_id, None, update.stage, None),
        }

        let mut pending = self.inner.pending.lock().unwrap();
        match pending.get_mut(job_id) {
            Some(entry) => {
                // A timer is already running; just keep the newest delta for
                // it to flush.
                entry.latest = update;
            }
            None => {
                let timer = tokio::spawn(flush_after(
                    Arc::clone(&self.inner),
                    job_id.to_string(),
                ));
                pending.insert(
                    job_id.to_string(),
                    PendingFlush {
                        latest: update,
                        timer,
                    },
                );
            }
        }
    }

    /// Unthrottled log relay; nothing is persisted.
    pub fn on_log(&self, job_id: &str, level: LogLevel, message: &str) {
        self.inner.bus.publish(
            &job_room(job_id),
            JobEvent::Log(LogPayload {
                job_id: job_id.to_string(),
                timestamp: unix_millis(),
                level,
                message: message.to_string(),
            }),
        );
    }

    /// Terminal success: drop any buffered delta, write the terminal row,
    /// then tell the room.
    pub async fn on_completed(
        &self,
        job_id: &str,
        filename: &str,
        output_path: &str,
        size: u64,
    ) -> anyhow::Result<()> {
        self.cancel_pending(job_id);
        self.terminal_write(job_id, || async {
            self.inner
                .store
                .set_completed(job_id, filename, output_path, Some(size as i64))
                .await
        })
        .await?;
        self.inner.bus.publish(
            &job_room(job_id),
            JobEvent::Completed(CompletedPayload {
                job_id: job_id.to_string(),
                filename: filename.to_string(),
                size,
                output_path: output_path.to_string(),
            }),
        );
        Ok(())
    }

    /// Terminal failure: same discipline as `on_completed`.
    pub async fn on_failed(
        &self,
        job_id: &str,
        code: ErrorCode,
        message: &str,
    ) -> anyhow::Result<()> {
        self.cancel_pending(job_id);
        self.terminal_write(job_id, || async {
            self.inner
                .store
                .update_status(job_id, JobStatus::Failed, Some(code), Some(message))
                .await
        })
        .await?;
        self.inner.bus.publish(
            &job_room(job_id),
            JobEvent::Failed(FailedPayload {
                job_id: job_id.to_string(),
                error_code: code,
                message: message.to_string(),
            }),
        );
        Ok(())
    }

    /// Coarse aggregate update (status and/or stage/progress), published
    /// after the store writes land.
    pub async fn on_job_update(
        &self,
        job_id: &str,
        status: Option<JobStatus>,
        stage: Option<JobStage>,
        progress: Option<f64>,
    ) -> anyhow::Result<()> {
        if let Some(status) = status {
            self.inner
                .store
                .update_status(job_id, status, None, None)
                .await?;
        }
        if stage.is_some() || progress.is_some() {
            self.inner
                .store
                .update_progress(
                    job_id,
                    &ProgressUpdate {
                        progress,
                        stage,
                        ..Default::default()
                    },
                )
                .await?;
        }
        self.publish_job_update(job_id, status, stage, progress);
        Ok(())
    }

    /// Publish a `job-update` without touching the store. Used when the
    /// caller already performed the writes (e.g. retry reset).
    pub fn publish_job_update(
        &self,
        job_id: &str,
        status: Option<JobStatus>,
        stage: Option<JobStage>,
        progress: Option<f64>,
    ) {
        self.inner.bus.publish(
            &job_room(job_id),
            JobEvent::JobUpdate(JobUpdatePayload {
                job_id: job_id.to_string(),
                status: status.map(|s| s.as_str().to_string()),
                stage: stage.map(|s| s.as_str().to_string()),
                progress,
            }),
        );
    }

    /// Abort the flush timer and discard the buffered delta; the terminal
    /// state supersedes it.
    fn cancel_pending(&self, job_id: &str) {
        let removed = self.inner.pending.lock().unwrap().remove(job_id);
        if let Some(entry) = removed {
            entry.timer.abort();
        }
    }

    /// Terminal store writes are retried once; losing one silently would
    /// strand the job, so persistent failure is escalated loudly.
    async fn terminal_write<F, Fut>(&self, job_id: &str, write: F) -> anyhow::Result<()>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<(), crate::job_store::StoreError>>,
    {
        match write().await {
            Ok(()) => Ok(()),
            Err(crate::job_store::StoreError::IllegalTransition { from, to }) => {
                // A concurrent control path already finished this job.
                tracing::debug!(job_id, ?from, ?to, "terminal write skipped");
                Ok(())
            }
            Err(first) => {
                tracing::warn!(job_id, "terminal write failed, retrying once: {}", first);
                match write().await {
                    Ok(()) => Ok(()),
                    Err(second) => {
                        tracing::error!(job_id, "terminal write failed twice: {}", second);
                        Err(second.into())
                    }
                }
            }
        }
    }
}

async fn flush_after(inner: Arc<PipelineInner>, job_id: JobId) {
    tokio::time::sleep(inner.throttle).await;
    let latest = {
        let mut pending = inner.pending.lock().unwrap();
        pending.remove(&job_id).map(|entry| entry.latest)
    };
    let Some(latest) = latest else {
        return;
    };
    inner.progress_writes.fetch_add(1, Ordering::Relaxed);
    if let Err(e) = inner.store.update_progress(&job_id, &latest).await {
        tracing::warn!(job_id = %job_id, "throttled progress write failed: {}", e);
    }
}
