//! yt-dlp adapter: youtube and HLS kinds.
//!
//! Progress comes from "[download]  42.5% of 10.00MiB at 2.00MiB/s ETA 00:05"
//! lines (one per line with --newline); merge and post-processing phases are
//! reported as stage changes.

use anyhow::Result;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use super::{collect_largest_file, Artifact, LineAdapter, ParseCtx, ProcessSpec, ProgressDelta};
use crate::error::ErrorCode;
use crate::job_store::{Job, JobStage};

pub struct YtdlpAdapter {
    binary: PathBuf,
    /// HLS streams pin a concrete mp4 selector; plain youtube takes defaults.
    hls: bool,
}

impl YtdlpAdapter {
    pub fn new(binary: PathBuf, hls: bool) -> Self {
        Self { binary, hls }
    }
}

fn download_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\[download\]\s+(?P<pct>\d+(?:\.\d+)?)%\s+of\s+~?\s*(?P<size>\d+(?:\.\d+)?)(?P<unit>[KMGT]iB)(?:\s+at\s+(?P<rate>\d+(?:\.\d+)?)(?P<rate_unit>[KMGT]iB)/s)?(?:\s+ETA\s+(?P<eta>[\d:]+))?",
        )
        .unwrap()
    })
}

fn destination_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[download\]\s+Destination:\s+(?P<dest>.+)").unwrap())
}

fn binary_size_bytes(value: f64, unit: &str) -> i64 {
    let factor: f64 = match unit {
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "TiB" => 1024.0_f64.powi(4),
        _ => 1.0,
    };
    (value * factor) as i64
}

fn eta_to_secs(eta: &str) -> Option<i64> {
    let mut secs: i64 = 0;
    for part in eta.split(':') {
        secs = secs.checked_mul(60)?.checked_add(part.parse().ok()?)?;
    }
    Some(secs)
}

impl LineAdapter for YtdlpAdapter {
    fn build(&self, job: &Job, work_dir: &Path) -> Result<ProcessSpec> {
        let mut args = vec![
            "--newline".to_string(),
            "--no-playlist".to_string(),
            "-P".to_string(),
            work_dir.display().to_string(),
        ];
        if self.hls {
            args.push("-f".to_string());
            args.push("best[ext=mp4]".to_string());
        }
        if let Some(hint) = job.options.filename_hint.as_deref() {
            args.push("-o".to_string());
            args.push(format!("{}.%(ext)s", hint));
        }
        if let Some(headers) = job.options.headers.as_ref() {
            if let Some(ua) = headers.ua.as_deref() {
                args.push("--user-agent".to_string());
                args.push(ua.to_string());
            }
            if let Some(referer) = headers.referer.as_deref() {
                args.push("--referer".to_string());
                args.push(referer.to_string());
            }
            for (name, value) in &headers.extra {
                args.push("--add-header".to_string());
                args.push(format!("{}:{}", name, value));
            }
        }
        args.push(job.url.clone());

        Ok(ProcessSpec {
            program: self.binary.clone(),
            args,
            env: Vec::new(),
            cwd: work_dir.to_path_buf(),
        })
    }

    fn parse_line(&self, line: &str, _ctx: &mut ParseCtx) -> Option<ProgressDelta> {
        if let Some(caps) = download_re().captures(line) {
            let pct: f64 = caps.name("pct")?.as_str().parse().ok()?;
            let size: f64 = caps.name("size")?.as_str().parse().ok()?;
            let total_bytes = binary_size_bytes(size, caps.name("unit")?.as_str());
            let speed = match (caps.name("rate"), caps.name("rate_unit")) {
                (Some(rate), Some(unit)) => Some(format!("{}{}/s", rate.as_str(), unit.as_str())),
                _ => None,
            };
            let eta_secs = caps.name("eta").and_then(|m| eta_to_secs(m.as_str()));
            return Some(ProgressDelta {
                progress: Some(pct),
                stage: JobStage::Download,
                speed,
                eta_secs,
                total_bytes: Some(total_bytes),
                message: None,
            });
        }
        if let Some(caps) = destination_re().captures(line) {
            return Some(ProgressDelta::stage_only(
                JobStage::Download,
                Some(format!("writing {}", caps.name("dest").unwrap().as_str())),
            ));
        }
        if line.starts_with("[Merger]") || line.starts_with("[ffmpeg] Merging") {
            return Some(ProgressDelta::stage_only(
                JobStage::Merge,
                Some("merging formats".to_string()),
            ));
        }
        None
    }

    fn classify_error(&self, _exit_code: Option<i32>, stderr_tail: &str) -> ErrorCode {
        let tail = stderr_tail.to_ascii_lowercase();
        if tail.contains("video unavailable")
            || tail.contains("this video has been removed")
            || tail.contains("geo restricted")
            || tail.contains("not available in your country")
        {
            ErrorCode::VideoUnavailable
        } else if tail.contains("sign in to confirm")
            || tail.contains("private video")
            || tail.contains("login required")
            || tail.contains("members-only")
        {
            ErrorCode::AuthRequired
        } else if tail.contains("requested format is not available")
            || tail.contains("no video formats")
        {
            ErrorCode::FormatError
        } else if tail.contains("is not a valid url") || tail.contains("unsupported url") {
            ErrorCode::InvalidUrl
        } else if tail.contains("no space left") {
            ErrorCode::DiskFull
        } else if tail.contains("timed out")
            || tail.contains("connection")
            || tail.contains("network")
            || tail.contains("http error 5")
            || tail.contains("unable to download")
        {
            ErrorCode::NetworkError
        } else {
            ErrorCode::InternalError
        }
    }

    fn collect_artifact(&self, work_dir: &Path) -> Result<Artifact> {
        collect_largest_file(work_dir)
    }
}
