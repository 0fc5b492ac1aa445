//! Public façade over the job fabric: submit, query, and control operations,
//! plus the worker loop that drives reserved queue items through the
//! supervisor.
//!
//! Status ownership lives here: workers and control paths funnel every
//! status write through this module (directly or via the progress
//! pipeline), which keeps per-job transitions serialized.

mod registry;
mod validate;

pub use registry::JobControl;
pub use validate::{sanitize_filename, validate_submit};

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use crate::adapters::{builtin_adapter, sniff_kind, Adapter};
use crate::broker::{Broker, BrokerConfig, NackOutcome, Reservation, PRIORITY_HIGH, PRIORITY_NORMAL};
use crate::config::MdmConfig;
use crate::error::ErrorCode;
use crate::events::EventBus;
use crate::job_store::{
    Job, JobFilter, JobId, JobKind, JobStatus, JobStore, StoreError, SubmitOptions,
};
use crate::progress::ProgressPipeline;
use crate::supervisor::{AbortReason, JobOutcome, Supervisor};

/// Errors surfaced to callers of the public operations.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("illegal transition: {0}")]
    IllegalTransition(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl OrchestratorError {
    /// Stable identifier for wire responses.
    pub fn code(&self) -> ErrorCode {
        match self {
            OrchestratorError::InvalidInput(_) => ErrorCode::InvalidInput,
            OrchestratorError::NotFound(_) => ErrorCode::NotFound,
            OrchestratorError::IllegalTransition(_) => ErrorCode::IllegalTransition,
            OrchestratorError::Internal(_) => ErrorCode::InternalError,
        }
    }
}

impl From<StoreError> for OrchestratorError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => OrchestratorError::NotFound(id),
            StoreError::IllegalTransition { from, to } => OrchestratorError::IllegalTransition(
                format!("{} -> {}", from.as_str(), to.as_str()),
            ),
            StoreError::Conflict(id) => {
                OrchestratorError::InvalidInput(format!("job already exists: {}", id))
            }
            other => OrchestratorError::Internal(other.into()),
        }
    }
}

/// A submission as received from any front-end binding.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub url: String,
    pub kind: JobKind,
    pub options: SubmitOptions,
}

/// Adapter selection hook; the default is the built-in kind table. Tests
/// inject script-backed adapters here.
pub type AdapterFactory = Box<dyn Fn(&Job, &MdmConfig) -> Result<Adapter> + Send + Sync>;

/// Priority class for a submission: interactive media kinds outrank bulk
/// fetches.
pub fn priority_for(kind: JobKind, url: &str) -> i64 {
    let effective = match kind {
        JobKind::Auto => sniff_kind(url),
        other => other,
    };
    match effective {
        JobKind::Youtube | JobKind::Hls => PRIORITY_HIGH,
        _ => PRIORITY_NORMAL,
    }
}

struct Inner {
    cfg: MdmConfig,
    store: JobStore,
    broker: Broker,
    bus: EventBus,
    pipeline: ProgressPipeline,
    supervisor: Supervisor,
    control: JobControl,
    adapter_factory: AdapterFactory,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Open against the default database location.
    pub async fn open(cfg: MdmConfig) -> Result<Self> {
        let db_path = crate::config::default_db_path()?;
        Self::open_at(cfg, &db_path).await
    }

    /// Open against an explicit database path with the built-in adapters.
    pub async fn open_at(cfg: MdmConfig, db_path: &Path) -> Result<Self> {
        Self::open_with(cfg, db_path, Box::new(builtin_adapter)).await
    }

    /// Open with a custom adapter factory (integration tests).
    pub async fn open_with(
        cfg: MdmConfig,
        db_path: &Path,
        adapter_factory: AdapterFactory,
    ) -> Result<Self> {
        let broker_cfg = BrokerConfig {
            capacity: cfg.max_concurrent_jobs.max(1),
            ..Default::default()
        };
        Self::open_custom(cfg, db_path, adapter_factory, broker_cfg).await
    }

    /// Fully parameterized constructor; tests shrink the broker's backoff
    /// through this.
    pub async fn open_custom(
        cfg: MdmConfig,
        db_path: &Path,
        adapter_factory: AdapterFactory,
        broker_cfg: BrokerConfig,
    ) -> Result<Self> {
        let pool = crate::db::open_pool(db_path).await?;
        let store = JobStore::new(pool.clone()).await?;
        let broker = Broker::new(pool, broker_cfg).await?;
        let bus = EventBus::default();
        let pipeline = ProgressPipeline::new(store.clone(), bus.clone(), cfg.throttle_interval());
        let supervisor = Supervisor::new(cfg.clone(), pipeline.clone());

        tokio::fs::create_dir_all(&cfg.data_dir).await?;
        tokio::fs::create_dir_all(&cfg.temp_dir).await?;

        Ok(Self {
            inner: Arc::new(Inner {
                cfg,
                store,
                broker,
                bus,
                pipeline,
                supervisor,
                control: JobControl::new(),
                adapter_factory,
            }),
        })
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn store(&self) -> &JobStore {
        &self.inner.store
    }

    pub fn pipeline(&self) -> &ProgressPipeline {
        &self.inner.pipeline
    }

    pub fn config(&self) -> &MdmConfig {
        &self.inner.cfg
    }

    /// Validate, persist, and enqueue a new job.
    pub async fn submit(&self, mut req: SubmitRequest) -> Result<JobId, OrchestratorError> {
        validate_submit(&mut req).map_err(OrchestratorError::InvalidInput)?;
        let priority = priority_for(req.kind, &req.url);
        let job = Job::new_queued(req.url, req.kind, req.options);

        self.inner.store.insert(&job).await?;
        self.inner
            .broker
            .enqueue(&job.id, priority, &job.id)
            .await?;
        self.inner
            .pipeline
            .publish_job_update(&job.id, Some(JobStatus::Queued), None, None);
        tracing::info!(job_id = %job.id, kind = job.kind.as_str(), "job submitted");
        Ok(job.id)
    }

    pub async fn get(&self, id: &str) -> Result<Job, OrchestratorError> {
        Ok(self.inner.store.get(id).await?)
    }

    pub async fn list(&self, filter: &JobFilter) -> Result<(Vec<Job>, i64), OrchestratorError> {
        Ok(self.inner.store.list(filter).await?)
    }

    /// Cancel wherever the job currently is: queue entry removed, running
    /// child flagged, status flipped exactly once. Cancelling an already
    /// cancelled job is a no-op.
    pub async fn cancel(&self, id: &str) -> Result<(), OrchestratorError> {
        let job = self.inner.store.get(id).await?;
        match job.status {
            JobStatus::Cancelled => Ok(()),
            JobStatus::Completed | JobStatus::Failed => Err(OrchestratorError::IllegalTransition(
                format!("{} -> cancelled", job.status.as_str()),
            )),
            JobStatus::Queued | JobStatus::Paused => {
                self.inner.broker.remove(id).await?;
                self.inner
                    .store
                    .update_status(id, JobStatus::Cancelled, None, None)
                    .await?;
                self.inner
                    .pipeline
                    .publish_job_update(id, Some(JobStatus::Cancelled), None, None);
                Ok(())
            }
            JobStatus::Running => {
                if self.inner.control.request_abort(id, AbortReason::Cancel) {
                    // The driving worker finishes the transition once the
                    // child is down.
                    return Ok(());
                }
                // Marked running but nobody here drives it (stale row from a
                // crash); settle it directly.
                self.inner.broker.remove(id).await?;
                self.inner
                    .store
                    .update_status(id, JobStatus::Cancelled, None, None)
                    .await?;
                self.inner
                    .pipeline
                    .publish_job_update(id, Some(JobStatus::Cancelled), None, None);
                Ok(())
            }
        }
    }

    /// Pause a running job: the child is killed, the queue entry is kept for
    /// resume.
    pub async fn pause(&self, id: &str) -> Result<(), OrchestratorError> {
        let job = self.inner.store.get(id).await?;
        if job.status != JobStatus::Running {
            return Err(OrchestratorError::IllegalTransition(format!(
                "{} -> paused",
                job.status.as_str()
            )));
        }
        if !self.inner.control.request_abort(id, AbortReason::Pause) {
            // Stale running row; park it directly.
            self.inner
                .store
                .update_status(id, JobStatus::Paused, None, None)
                .await?;
            self.inner
                .pipeline
                .publish_job_update(id, Some(JobStatus::Paused), None, None);
        }
        Ok(())
    }

    /// Resume a paused job: fresh attempt, original priority, progress reset.
    pub async fn resume(&self, id: &str) -> Result<(), OrchestratorError> {
        let job = self.inner.store.get(id).await?;
        if job.status != JobStatus::Paused {
            return Err(OrchestratorError::IllegalTransition(format!(
                "{} -> queued",
                job.status.as_str()
            )));
        }
        if !self.inner.broker.resume(id).await? {
            let priority = priority_for(job.kind, &job.url);
            self.inner.broker.enqueue(id, priority, id).await?;
        }
        self.inner
            .store
            .update_status(id, JobStatus::Queued, None, None)
            .await?;
        self.inner.store.reset_progress_for_requeue(id).await?;
        self.inner
            .pipeline
            .publish_job_update(id, Some(JobStatus::Queued), None, Some(0.0));
        Ok(())
    }

    /// Retry a failed or cancelled job from scratch.
    pub async fn retry(&self, id: &str) -> Result<(), OrchestratorError> {
        let job = self.inner.store.get(id).await?;
        self.inner.store.reset_for_retry(id).await?;
        let priority = priority_for(job.kind, &job.url);
        self.inner.broker.enqueue(id, priority, id).await?;
        self.inner
            .pipeline
            .publish_job_update(id, Some(JobStatus::Queued), None, Some(0.0));
        tracing::info!(job_id = %id, "retry enqueued");
        Ok(())
    }

    /// Delete a terminal job's row and any parked queue entry.
    pub async fn remove(&self, id: &str) -> Result<(), OrchestratorError> {
        let job = self.inner.store.get(id).await?;
        if !job.status.is_terminal() {
            return Err(OrchestratorError::IllegalTransition(format!(
                "cannot remove a {} job",
                job.status.as_str()
            )));
        }
        self.inner.broker.remove(id).await?;
        self.inner.store.remove(id).await?;
        Ok(())
    }

    /// Startup reconciliation: release every reservation (no worker survived
    /// the restart), push stranded running rows back to queued, and re-create
    /// queue entries lost between insert and enqueue. Returns the number of
    /// jobs recovered.
    pub async fn reconcile(&self) -> Result<u32> {
        self.inner.broker.release_all_reserved().await?;

        let mut recovered = 0u32;
        for job in self.inner.store.running_jobs().await? {
            if !self.inner.broker.has_live_entry(&job.id).await? {
                let priority = priority_for(job.kind, &job.url);
                self.inner.broker.enqueue(&job.id, priority, &job.id).await?;
            }
            self.inner
                .store
                .update_status(&job.id, JobStatus::Queued, None, None)
                .await?;
            self.inner.store.reset_progress_for_requeue(&job.id).await?;
            self.inner
                .pipeline
                .publish_job_update(&job.id, Some(JobStatus::Queued), None, Some(0.0));
            recovered += 1;
        }

        let (queued, _) = self
            .inner
            .store
            .list(&JobFilter {
                status: Some(JobStatus::Queued),
                ..Default::default()
            })
            .await?;
        for job in queued {
            if !self.inner.broker.has_live_entry(&job.id).await? {
                let priority = priority_for(job.kind, &job.url);
                self.inner.broker.enqueue(&job.id, priority, &job.id).await?;
                recovered += 1;
            }
        }

        if recovered > 0 {
            tracing::info!("recovered {} job(s) from previous run", recovered);
        }
        Ok(recovered)
    }

    /// Drive queued work until the queue is fully drained (including retries
    /// still waiting out their backoff). Returns the number of settled runs.
    pub async fn run_until_idle(&self) -> Result<u32> {
        let mut tasks = tokio::task::JoinSet::new();
        let mut settled = 0u32;

        loop {
            while tasks.len() < self.inner.broker.capacity() {
                match self.inner.broker.try_reserve().await? {
                    Some(reservation) => {
                        let this = self.clone();
                        tasks.spawn(async move { this.drive(reservation).await });
                    }
                    None => break,
                }
            }

            if tasks.is_empty() {
                if self.inner.broker.outstanding().await? == 0 {
                    break;
                }
                // Everything left is backing off; sleep toward the earliest
                // due time.
                let wait = match self.inner.broker.next_due_millis().await? {
                    Some(due) => (due - crate::util::unix_millis()).clamp(50, 500) as u64,
                    None => 200,
                };
                tokio::time::sleep(std::time::Duration::from_millis(wait)).await;
                continue;
            }

            if let Some(joined) = tasks.join_next().await {
                settled += 1;
                match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::error!("worker failed: {:#}", e),
                    Err(e) => tracing::error!("worker panicked: {}", e),
                }
            }
        }
        Ok(settled)
    }

    /// Run the worker loop forever (service mode). The broker cap bounds
    /// concurrency; each reserved item is driven on its own task.
    pub async fn run_service(&self) -> Result<()> {
        loop {
            let reservation = self.inner.broker.reserve().await?;
            let this = self.clone();
            let job_id = reservation.job_id.clone();
            tokio::spawn(async move {
                if let Err(e) = this.drive(reservation).await {
                    tracing::error!(job_id = %job_id, "worker failed: {:#}", e);
                }
            });
        }
    }

    /// Drive one reserved queue item to settlement.
    async fn drive(&self, reservation: Reservation) -> Result<()> {
        let inner = &self.inner;
        let job = match inner.store.get(&reservation.job_id).await {
            Ok(job) => job,
            Err(StoreError::NotFound(_)) => {
                inner.broker.ack(&reservation).await?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        if job.status != JobStatus::Queued {
            // Cancelled (or otherwise settled) while waiting in the queue.
            inner.broker.ack(&reservation).await?;
            return Ok(());
        }

        // Register before the status flips to running so a cancel issued at
        // any point after the flip always finds the flag.
        let flag = inner.control.register(&job.id);

        match inner
            .store
            .update_status(&job.id, JobStatus::Running, None, None)
            .await
        {
            Ok(()) => {}
            Err(StoreError::IllegalTransition { .. }) => {
                // A control path settled the job between our read and write.
                inner.control.unregister(&job.id);
                inner.broker.ack(&reservation).await?;
                return Ok(());
            }
            Err(e) => {
                inner.control.unregister(&job.id);
                return Err(e.into());
            }
        }
        inner
            .pipeline
            .publish_job_update(&job.id, Some(JobStatus::Running), None, None);

        let adapter = match (inner.adapter_factory)(&job, &inner.cfg) {
            Ok(adapter) => adapter,
            Err(e) => {
                inner.control.unregister(&job.id);
                inner.broker.ack(&reservation).await?;
                inner
                    .pipeline
                    .on_failed(&job.id, ErrorCode::InternalError, &format!("{:#}", e))
                    .await?;
                return Ok(());
            }
        };
        let heartbeat = {
            let broker = inner.broker.clone();
            let reservation = reservation.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(std::time::Duration::from_secs(5));
                loop {
                    tick.tick().await;
                    if broker.heartbeat(&reservation).await.is_err() {
                        break;
                    }
                }
            })
        };

        let outcome = inner.supervisor.run_job(&job, &adapter, &flag).await;

        heartbeat.abort();
        inner.control.unregister(&job.id);

        // The reservation is always settled before the terminal status
        // lands, so a slot is never held across a finished job.
        match outcome {
            Ok(JobOutcome::Completed(artifact)) => {
                inner.broker.ack(&reservation).await?;
                inner
                    .pipeline
                    .on_completed(
                        &job.id,
                        &artifact.filename,
                        &artifact.path.display().to_string(),
                        artifact.size,
                    )
                    .await?;
            }
            Ok(JobOutcome::Failed { code, message }) => {
                self.settle_failure(&reservation, &job.id, code, &message)
                    .await?;
            }
            Ok(JobOutcome::Aborted(AbortReason::Cancel)) => {
                inner.broker.ack(&reservation).await?;
                self.settle_status(&job.id, JobStatus::Cancelled).await?;
            }
            Ok(JobOutcome::Aborted(AbortReason::Pause)) => {
                inner.broker.nack_paused(&reservation).await?;
                self.settle_status(&job.id, JobStatus::Paused).await?;
            }
            Err(e) => {
                self.settle_failure(
                    &reservation,
                    &job.id,
                    ErrorCode::InternalError,
                    &format!("{:#}", e),
                )
                .await?;
            }
        }
        Ok(())
    }

    /// Status write for an aborted run. Tolerates a concurrent control path
    /// having settled the job already.
    async fn settle_status(&self, job_id: &str, status: JobStatus) -> Result<()> {
        match self
            .inner
            .store
            .update_status(job_id, status, None, None)
            .await
        {
            Ok(()) => {
                self.inner
                    .pipeline
                    .publish_job_update(job_id, Some(status), None, None);
                Ok(())
            }
            Err(StoreError::IllegalTransition { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Failed run: retry through the broker when the code allows and
    /// attempts remain, terminal-fail otherwise.
    async fn settle_failure(
        &self,
        reservation: &Reservation,
        job_id: &str,
        code: ErrorCode,
        message: &str,
    ) -> Result<()> {
        let inner = &self.inner;
        if code.retry_eligible() {
            match inner.broker.nack(reservation, message).await? {
                NackOutcome::Retry { .. } => {
                    inner
                        .store
                        .update_status(job_id, JobStatus::Queued, None, None)
                        .await?;
                    inner.store.reset_progress_for_requeue(job_id).await?;
                    inner
                        .pipeline
                        .publish_job_update(job_id, Some(JobStatus::Queued), None, Some(0.0));
                    return Ok(());
                }
                NackOutcome::Dead => {}
            }
        } else {
            inner.broker.ack(reservation).await?;
        }
        inner.pipeline.on_failed(job_id, code, message).await?;
        Ok(())
    }
}
