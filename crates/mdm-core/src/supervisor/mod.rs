//! Per-slot driver for one external pipeline.
//!
//! Launches the adapter's child (or daemon-side transfer), consumes its
//! output concurrently, enforces the watchdog and the hard deadline, honors
//! cancel/pause flags with a graceful-then-forceful kill, and moves the
//! artifact from the per-job temp dir into the data dir on success.

mod control;
mod finalize;

pub use control::{AbortReason, CancelFlag};
pub use finalize::finalize_artifact;

use anyhow::Result;
use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::Instant;

use crate::adapters::{
    snapshot_delta, Adapter, Artifact, LineAdapter, ParseCtx, PollAdapter, PollState,
    ProgressDelta, TranscodeAdapter,
};
use crate::config::MdmConfig;
use crate::error::ErrorCode;
use crate::events::LogLevel;
use crate::job_store::{Job, JobStage, ProgressUpdate};
use crate::progress::ProgressPipeline;

/// Mid-run progress ceiling; the jump to 100 belongs to the terminal write.
const RUNNING_PROGRESS_CAP: f64 = 95.0;

/// How often the control path wakes to check flags and timers.
const CONTROL_TICK: Duration = Duration::from_millis(250);

/// Kept stderr lines for error classification.
const STDERR_TAIL_LINES: usize = 40;

/// How one run ended.
#[derive(Debug)]
pub enum JobOutcome {
    Completed(Artifact),
    Failed { code: ErrorCode, message: String },
    Aborted(AbortReason),
}

#[derive(Clone)]
pub struct Supervisor {
    cfg: MdmConfig,
    pipeline: ProgressPipeline,
}

impl Supervisor {
    pub fn new(cfg: MdmConfig, pipeline: ProgressPipeline) -> Self {
        Self { cfg, pipeline }
    }

    /// Drive one job to an outcome. The caller owns the status writes; this
    /// only emits progress/log events and returns how the run ended.
    pub async fn run_job(
        &self,
        job: &Job,
        adapter: &Adapter,
        flag: &CancelFlag,
    ) -> Result<JobOutcome> {
        let temp_dir = self.cfg.temp_dir.join(&job.id);
        tokio::fs::create_dir_all(&temp_dir).await?;

        let deadline = Instant::now() + self.cfg.job_timeout();
        let mut ctx = initial_ctx(job);

        let outcome = match adapter {
            Adapter::Line(line_adapter) => {
                self.run_child(job, line_adapter.as_ref(), &mut ctx, &temp_dir, deadline, flag)
                    .await?
            }
            Adapter::Poll(poll_adapter) => {
                self.run_poll(job, poll_adapter.as_ref(), &temp_dir, deadline, flag)
                    .await?
            }
        };

        let outcome = match outcome {
            JobOutcome::Completed(artifact) => {
                self.maybe_transcode(job, artifact, &mut ctx, &temp_dir, deadline, flag)
                    .await?
            }
            other => other,
        };

        match outcome {
            JobOutcome::Completed(artifact) => {
                self.pipeline.on_progress(
                    &job.id,
                    ProgressUpdate {
                        stage: Some(JobStage::Finalize),
                        ..Default::default()
                    },
                );
                match finalize_artifact(&job.id, &artifact, &temp_dir, &self.cfg.data_dir) {
                    Ok(final_artifact) => Ok(JobOutcome::Completed(final_artifact)),
                    Err(e) => {
                        let code = if finalize::is_disk_full(&e) {
                            ErrorCode::DiskFull
                        } else {
                            ErrorCode::InternalError
                        };
                        Ok(JobOutcome::Failed {
                            code,
                            message: format!("finalize failed: {:#}", e),
                        })
                    }
                }
            }
            JobOutcome::Aborted(AbortReason::Cancel) => {
                // Cancelled work won't resume; drop the scratch space. Paused
                // and failed runs keep it for the next attempt.
                let _ = tokio::fs::remove_dir_all(&temp_dir).await;
                Ok(JobOutcome::Aborted(AbortReason::Cancel))
            }
            other => Ok(other),
        }
    }

    async fn run_child(
        &self,
        job: &Job,
        adapter: &dyn LineAdapter,
        ctx: &mut ParseCtx,
        work_dir: &Path,
        deadline: Instant,
        flag: &CancelFlag,
    ) -> Result<JobOutcome> {
        let spec = adapter.build(job, work_dir)?;
        tracing::debug!(job_id = %job.id, program = %spec.program.display(), "launching child");

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&spec.cwd)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        let mut child = command.spawn().map_err(|e| {
            anyhow::anyhow!("spawn {} failed: {}", spec.program.display(), e)
        })?;

        let (line_tx, mut line_rx) = tokio::sync::mpsc::channel::<(bool, String)>(64);
        spawn_line_reader(child.stdout.take(), false, line_tx.clone());
        spawn_line_reader(child.stderr.take(), true, line_tx);

        let mut stderr_tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let mut stage = JobStage::Download;
        let mut last_progress: Option<f64> = None;
        let mut last_change = Instant::now();
        let mut tick = tokio::time::interval(CONTROL_TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe_line = line_rx.recv() => {
                    let Some((is_stderr, line)) = maybe_line else {
                        break; // both pipes at EOF
                    };
                    if is_stderr {
                        if stderr_tail.len() == STDERR_TAIL_LINES {
                            stderr_tail.pop_front();
                        }
                        stderr_tail.push_back(line.clone());
                    }
                    match adapter.parse_line(&line, ctx) {
                        Some(delta) => {
                            stage = delta.stage;
                            if let Some(p) = delta.progress {
                                if last_progress != Some(p) {
                                    last_progress = Some(p);
                                    last_change = Instant::now();
                                }
                            }
                            self.forward_delta(&job.id, delta);
                        }
                        None if !line.trim().is_empty() => {
                            self.pipeline.on_log(&job.id, LogLevel::Debug, &line);
                        }
                        None => {}
                    }
                }
                _ = tick.tick() => {
                    if let Some(reason) = flag.requested() {
                        self.kill_gracefully(&mut child).await;
                        return Ok(JobOutcome::Aborted(reason));
                    }
                    if Instant::now() >= deadline {
                        self.kill_gracefully(&mut child).await;
                        return Ok(JobOutcome::Failed {
                            code: ErrorCode::Timeout,
                            message: "hard job deadline exceeded".to_string(),
                        });
                    }
                    let stalled = matches!(stage, JobStage::Download | JobStage::Transcode)
                        && last_change.elapsed() >= self.cfg.watchdog_stall();
                    if stalled {
                        self.kill_gracefully(&mut child).await;
                        return Ok(JobOutcome::Failed {
                            code: ErrorCode::WatchdogStall,
                            message: format!(
                                "no progress for {}s",
                                self.cfg.watchdog_stall().as_secs()
                            ),
                        });
                    }
                }
            }
        }

        let status = match tokio::time::timeout(self.cfg.grace_timeout(), child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                // Pipes closed but the process lingers.
                child.kill().await.ok();
                child.wait().await?
            }
        };

        if status.success() {
            match adapter.collect_artifact(work_dir) {
                Ok(artifact) => Ok(JobOutcome::Completed(artifact)),
                Err(e) => Ok(JobOutcome::Failed {
                    code: ErrorCode::InternalError,
                    message: format!("artifact collection failed: {:#}", e),
                }),
            }
        } else {
            let tail: String = stderr_tail.iter().cloned().collect::<Vec<_>>().join("\n");
            let code = adapter.classify_error(status.code(), &tail);
            let message = stderr_tail
                .iter()
                .rev()
                .find(|l| !l.trim().is_empty())
                .cloned()
                .unwrap_or_else(|| format!("exit code {:?}", status.code()));
            Ok(JobOutcome::Failed { code, message })
        }
    }

    async fn run_poll(
        &self,
        job: &Job,
        adapter: &dyn PollAdapter,
        work_dir: &Path,
        deadline: Instant,
        flag: &CancelFlag,
    ) -> Result<JobOutcome> {
        let handle = match adapter.start(job, work_dir).await {
            Ok(handle) => handle,
            Err(e) => {
                return Ok(JobOutcome::Failed {
                    code: ErrorCode::NetworkError,
                    message: format!("downloader daemon unavailable: {:#}", e),
                })
            }
        };

        let mut tick = tokio::time::interval(CONTROL_TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut next_poll = Instant::now();
        let mut last_completed = 0u64;
        let mut last_change = Instant::now();
        let mut poll_failures = 0u32;

        loop {
            tick.tick().await;

            if let Some(reason) = flag.requested() {
                let _ = adapter.cancel(&handle).await;
                return Ok(JobOutcome::Aborted(reason));
            }
            if Instant::now() >= deadline {
                let _ = adapter.cancel(&handle).await;
                return Ok(JobOutcome::Failed {
                    code: ErrorCode::Timeout,
                    message: "hard job deadline exceeded".to_string(),
                });
            }
            if Instant::now() < next_poll {
                continue;
            }
            next_poll = Instant::now() + self.cfg.poll_interval();

            let snapshot = match adapter.poll(&handle).await {
                Ok(snapshot) => {
                    poll_failures = 0;
                    snapshot
                }
                Err(e) => {
                    poll_failures += 1;
                    if poll_failures >= 3 {
                        return Ok(JobOutcome::Failed {
                            code: ErrorCode::NetworkError,
                            message: format!("status polling failed: {:#}", e),
                        });
                    }
                    continue;
                }
            };

            match snapshot.state {
                PollState::Complete => {
                    return match adapter.collect_artifact(work_dir, &snapshot) {
                        Ok(artifact) => Ok(JobOutcome::Completed(artifact)),
                        Err(e) => Ok(JobOutcome::Failed {
                            code: ErrorCode::InternalError,
                            message: format!("artifact collection failed: {:#}", e),
                        }),
                    };
                }
                PollState::Error | PollState::Removed => {
                    let message = snapshot
                        .error_message
                        .unwrap_or_else(|| "download removed".to_string());
                    return Ok(JobOutcome::Failed {
                        code: adapter.classify_error(&message),
                        message,
                    });
                }
                PollState::Active | PollState::Waiting => {
                    if snapshot.completed_bytes != last_completed {
                        last_completed = snapshot.completed_bytes;
                        last_change = Instant::now();
                    } else if last_change.elapsed() >= self.cfg.watchdog_stall() {
                        let _ = adapter.cancel(&handle).await;
                        return Ok(JobOutcome::Failed {
                            code: ErrorCode::WatchdogStall,
                            message: format!(
                                "no progress for {}s",
                                self.cfg.watchdog_stall().as_secs()
                            ),
                        });
                    }
                    self.forward_delta(&job.id, snapshot_delta(&snapshot));
                }
            }
        }
    }

    /// Optional second phase: transcode the downloaded video in place.
    /// Directory artifacts (image bundles) pass through untouched.
    async fn maybe_transcode(
        &self,
        job: &Job,
        artifact: Artifact,
        ctx: &mut ParseCtx,
        temp_dir: &Path,
        deadline: Instant,
        flag: &CancelFlag,
    ) -> Result<JobOutcome> {
        let Some(opts) = job.options.transcode.clone() else {
            return Ok(JobOutcome::Completed(artifact));
        };
        if artifact.path.is_dir() {
            return Ok(JobOutcome::Completed(artifact));
        }

        match crate::adapters::probe_duration_us(&self.cfg.tools.ffmpeg, &artifact.path).await {
            Ok(us) => ctx.total_duration_us = Some(us),
            Err(e) => {
                // Without a duration the transcode still runs; it just can't
                // report a percent.
                tracing::warn!(job_id = %job.id, "duration probe failed: {:#}", e);
            }
        }

        let stem = Path::new(&artifact.filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("output");
        let output = temp_dir.join(format!("{}.{}", stem, opts.to.extension()));
        let transcoder = TranscodeAdapter::new(
            self.cfg.tools.ffmpeg.clone(),
            artifact.path.clone(),
            output,
            opts,
        );

        self.pipeline.on_progress(
            &job.id,
            ProgressUpdate {
                stage: Some(JobStage::Transcode),
                ..Default::default()
            },
        );

        match self
            .run_child(job, &transcoder, ctx, temp_dir, deadline, flag)
            .await?
        {
            JobOutcome::Completed(transcoded) => {
                let _ = tokio::fs::remove_file(&artifact.path).await;
                Ok(JobOutcome::Completed(transcoded))
            }
            other => Ok(other),
        }
    }

    fn forward_delta(&self, job_id: &str, delta: ProgressDelta) {
        if let Some(message) = delta.message.as_deref() {
            self.pipeline.on_log(job_id, LogLevel::Info, message);
        }
        self.pipeline.on_progress(
            job_id,
            ProgressUpdate {
                progress: delta.progress.map(|p| p.clamp(0.0, RUNNING_PROGRESS_CAP)),
                stage: Some(delta.stage),
                speed: delta.speed,
                eta_secs: delta.eta_secs,
                total_bytes: delta.total_bytes,
            },
        );
    }

    /// SIGTERM, wait out the grace period, then SIGKILL.
    async fn kill_gracefully(&self, child: &mut Child) {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
        }
        if tokio::time::timeout(self.cfg.grace_timeout(), child.wait())
            .await
            .is_err()
        {
            child.kill().await.ok();
            let _ = child.wait().await;
        }
    }
}

fn initial_ctx(job: &Job) -> ParseCtx {
    ParseCtx {
        expected_items: job
            .options
            .twitter
            .as_ref()
            .map(|t| u64::from(t.max_tweets))
            .or_else(|| {
                job.options
                    .pinterest
                    .as_ref()
                    .map(|p| u64::from(p.max_images))
            }),
        ..Default::default()
    }
}

fn spawn_line_reader<R>(reader: Option<R>, is_stderr: bool, tx: tokio::sync::mpsc::Sender<(bool, String)>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    let Some(reader) = reader else {
        return;
    };
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send((is_stderr, line)).await.is_err() {
                break; // supervisor gone; discard the rest
            }
        }
    });
}
