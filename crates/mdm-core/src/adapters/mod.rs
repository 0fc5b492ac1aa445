//! Downloader and transcoder adapters.
//!
//! An adapter plugs one external tool into the supervisor. Line adapters
//! spawn a child process and translate its stdout/stderr line-by-line into
//! progress deltas; poll adapters drive a daemon over RPC and translate
//! status snapshots instead. Both end with a single artifact path the
//! supervisor moves into the data dir.

mod aria2;
mod infer;
mod pinterest;
mod transcode;
mod twitter;
mod ytdlp;

pub use aria2::Aria2Adapter;
pub use infer::sniff_kind;
pub use transcode::{probe_duration_us, TranscodeAdapter};
pub use twitter::TwitterAdapter;
pub use pinterest::PinterestAdapter;
pub use ytdlp::YtdlpAdapter;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::config::MdmConfig;
use crate::error::ErrorCode;
use crate::job_store::{Job, JobKind, JobStage};

/// Everything needed to launch one external pipeline.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: PathBuf,
}

/// One parsed progress observation.
#[derive(Debug, Clone)]
pub struct ProgressDelta {
    /// Percent in [0, 100]; None for stage-only observations.
    pub progress: Option<f64>,
    pub stage: JobStage,
    pub speed: Option<String>,
    pub eta_secs: Option<i64>,
    pub total_bytes: Option<i64>,
    /// Human phase note, e.g. a destination filename.
    pub message: Option<String>,
}

impl ProgressDelta {
    pub fn stage_only(stage: JobStage, message: Option<String>) -> Self {
        Self {
            progress: None,
            stage,
            speed: None,
            eta_secs: None,
            total_bytes: None,
            message,
        }
    }
}

/// Mutable parse state threaded through one run: counters for count-based
/// estimators and the probed input duration for the transcode phase.
#[derive(Debug, Clone, Default)]
pub struct ParseCtx {
    pub total_duration_us: Option<u64>,
    pub expected_items: Option<u64>,
    pub items_done: u64,
}

/// What a finished run produced. May be a single file or a directory of
/// files; the core treats the path as opaque.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Adapter for tools that stream progress on stdout/stderr.
pub trait LineAdapter: Send + Sync {
    fn build(&self, job: &Job, work_dir: &Path) -> Result<ProcessSpec>;
    /// Pure mapping of one output line to a delta; None for noise.
    fn parse_line(&self, line: &str, ctx: &mut ParseCtx) -> Option<ProgressDelta>;
    fn classify_error(&self, exit_code: Option<i32>, stderr_tail: &str) -> ErrorCode;
    fn collect_artifact(&self, work_dir: &Path) -> Result<Artifact>;
}

/// Daemon-side download state reported by a poll adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Active,
    Waiting,
    Complete,
    Error,
    Removed,
}

#[derive(Debug, Clone)]
pub struct PollSnapshot {
    pub state: PollState,
    pub completed_bytes: u64,
    pub total_bytes: u64,
    pub speed_bps: u64,
    pub error_message: Option<String>,
    pub files: Vec<PathBuf>,
}

/// Token for one daemon-side download.
#[derive(Debug, Clone)]
pub struct PollHandle(pub String);

/// Adapter for control-plane downloaders polled over RPC.
#[async_trait]
pub trait PollAdapter: Send + Sync {
    async fn start(&self, job: &Job, work_dir: &Path) -> Result<PollHandle>;
    async fn poll(&self, handle: &PollHandle) -> Result<PollSnapshot>;
    /// Stop daemon-side work for a cancelled or paused job. Best-effort.
    async fn cancel(&self, handle: &PollHandle) -> Result<()>;
    fn classify_error(&self, message: &str) -> ErrorCode;
    fn collect_artifact(&self, work_dir: &Path, snapshot: &PollSnapshot) -> Result<Artifact>;
}

/// One downloader, either flavor.
pub enum Adapter {
    Line(Box<dyn LineAdapter>),
    Poll(Box<dyn PollAdapter>),
}

/// The effective kind a job runs as: `auto` is resolved by the URL sniffer.
pub fn effective_kind(job: &Job) -> JobKind {
    match job.kind {
        JobKind::Auto => sniff_kind(&job.url),
        other => other,
    }
}

/// Fixed kind-to-adapter policy.
pub fn builtin_adapter(job: &Job, cfg: &MdmConfig) -> Result<Adapter> {
    let kind = effective_kind(job);
    Ok(match kind {
        JobKind::Youtube => Adapter::Line(Box::new(YtdlpAdapter::new(
            cfg.tools.ytdlp.clone(),
            false,
        ))),
        JobKind::Hls => Adapter::Line(Box::new(YtdlpAdapter::new(cfg.tools.ytdlp.clone(), true))),
        JobKind::Twitter => Adapter::Line(Box::new(TwitterAdapter::new(cfg.tools.twmd.clone()))),
        JobKind::Pinterest => {
            Adapter::Line(Box::new(PinterestAdapter::new(cfg.tools.pinterest_dl.clone())))
        }
        JobKind::File => Adapter::Poll(Box::new(Aria2Adapter::new(
            cfg.tools.aria2_rpc_url.clone(),
            cfg.tools.aria2_secret.clone(),
        ))),
        // effective_kind never returns Auto.
        JobKind::Auto => Adapter::Poll(Box::new(Aria2Adapter::new(
            cfg.tools.aria2_rpc_url.clone(),
            cfg.tools.aria2_secret.clone(),
        ))),
    })
}

/// Convert a poll snapshot into a progress delta:
/// percent only when the total is known, ETA only when the rate is nonzero.
pub fn snapshot_delta(snapshot: &PollSnapshot) -> ProgressDelta {
    let progress = if snapshot.total_bytes > 0 {
        Some(100.0 * snapshot.completed_bytes as f64 / snapshot.total_bytes as f64)
    } else {
        None
    };
    let eta_secs = if snapshot.speed_bps > 0 && snapshot.total_bytes >= snapshot.completed_bytes {
        Some(((snapshot.total_bytes - snapshot.completed_bytes) / snapshot.speed_bps) as i64)
    } else {
        None
    };
    ProgressDelta {
        progress,
        stage: JobStage::Download,
        speed: Some(crate::util::fmt::format_throughput(snapshot.speed_bps as f64)),
        eta_secs,
        total_bytes: (snapshot.total_bytes > 0).then_some(snapshot.total_bytes as i64),
        message: None,
    }
}

/// Extensions of in-flight scratch files that are never the artifact.
const SCRATCH_EXTENSIONS: &[&str] = &["part", "ytdl", "tmp", "aria2", "temp"];

fn is_scratch(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => SCRATCH_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
        None => false,
    }
}

/// Pick the largest finished file in the work dir. Used by adapters whose
/// tool writes one output with a name we don't control.
pub(crate) fn collect_largest_file(work_dir: &Path) -> Result<Artifact> {
    let mut best: Option<(PathBuf, u64)> = None;
    for entry in std::fs::read_dir(work_dir)
        .with_context(|| format!("read work dir: {}", work_dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        let meta = entry.metadata()?;
        if !meta.is_file() || is_scratch(&path) {
            continue;
        }
        if best.as_ref().map_or(true, |(_, size)| meta.len() > *size) {
            best = Some((path, meta.len()));
        }
    }
    let (path, size) = best.ok_or_else(|| anyhow::anyhow!("no output file produced"))?;
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("download.bin")
        .to_string();
    Ok(Artifact {
        filename,
        path,
        size,
    })
}

/// Collect a directory of files as one artifact (multi-file tools). Fails
/// when the directory is empty.
pub(crate) fn collect_dir(dir: &Path) -> Result<Artifact> {
    let size = dir_size(dir)?;
    if size == 0 {
        anyhow::bail!("no files produced in {}", dir.display());
    }
    let filename = dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("media")
        .to_string();
    Ok(Artifact {
        filename,
        path: dir.to_path_buf(),
        size,
    })
}

fn dir_size(dir: &Path) -> Result<u64> {
    let mut total = 0;
    if !dir.is_dir() {
        return Ok(0);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            total += dir_size(&entry.path())?;
        } else if !is_scratch(&entry.path()) {
            total += meta.len();
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_delta_formulas() {
        let snapshot = PollSnapshot {
            state: PollState::Active,
            completed_bytes: 5_000_000,
            total_bytes: 10_000_000,
            speed_bps: 1_000_000,
            error_message: None,
            files: vec![],
        };
        let delta = snapshot_delta(&snapshot);
        assert_eq!(delta.progress, Some(50.0));
        assert_eq!(delta.eta_secs, Some(5));
        assert_eq!(delta.speed.as_deref(), Some("1.0 MB/s"));
        assert_eq!(delta.total_bytes, Some(10_000_000));
    }

    #[test]
    fn snapshot_delta_without_total_or_speed() {
        let snapshot = PollSnapshot {
            state: PollState::Active,
            completed_bytes: 100,
            total_bytes: 0,
            speed_bps: 0,
            error_message: None,
            files: vec![],
        };
        let delta = snapshot_delta(&snapshot);
        assert!(delta.progress.is_none(), "no percent without a total");
        assert!(delta.eta_secs.is_none(), "no eta without a rate");
        assert!(delta.total_bytes.is_none());
    }

    #[test]
    fn collect_largest_skips_scratch_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("video.mp4"), vec![0u8; 100]).unwrap();
        std::fs::write(dir.path().join("video.mp4.part"), vec![0u8; 10_000]).unwrap();
        std::fs::write(dir.path().join("meta.json"), vec![0u8; 10]).unwrap();

        let artifact = collect_largest_file(dir.path()).unwrap();
        assert_eq!(artifact.filename, "video.mp4");
        assert_eq!(artifact.size, 100);
    }

    #[test]
    fn collect_empty_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect_largest_file(dir.path()).is_err());
        let media = dir.path().join("media");
        std::fs::create_dir(&media).unwrap();
        assert!(collect_dir(&media).is_err());
    }

    #[test]
    fn collect_dir_sums_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("media");
        std::fs::create_dir(&media).unwrap();
        std::fs::write(media.join("a.jpg"), vec![0u8; 40]).unwrap();
        std::fs::create_dir(media.join("videos")).unwrap();
        std::fs::write(media.join("videos").join("b.mp4"), vec![0u8; 60]).unwrap();

        let artifact = collect_dir(&media).unwrap();
        assert_eq!(artifact.filename, "media");
        assert_eq!(artifact.size, 100);
    }
}
