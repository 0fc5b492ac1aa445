//! ffmpeg transcode adapter: optional second phase after a video download.
//!
//! With `-progress pipe:1` ffmpeg emits key=value lines on stdout;
//! `out_time_ms` (microseconds, despite the name) against the probed input
//! duration gives the percent.

use anyhow::{Context, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use super::{Artifact, LineAdapter, ParseCtx, ProcessSpec, ProgressDelta};
use crate::error::ErrorCode;
use crate::job_store::{Job, JobStage, TranscodeCodec, TranscodeOptions};

pub struct TranscodeAdapter {
    ffmpeg: PathBuf,
    input: PathBuf,
    output: PathBuf,
    opts: TranscodeOptions,
}

impl TranscodeAdapter {
    pub fn new(ffmpeg: PathBuf, input: PathBuf, output: PathBuf, opts: TranscodeOptions) -> Self {
        Self {
            ffmpeg,
            input,
            output,
            opts,
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }
}

fn out_time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^out_time_ms=(?P<us>\d+)").unwrap())
}

fn codec_arg(codec: TranscodeCodec) -> &'static str {
    match codec {
        TranscodeCodec::H264 => "libx264",
        TranscodeCodec::H265 => "libx265",
    }
}

impl LineAdapter for TranscodeAdapter {
    fn build(&self, _job: &Job, work_dir: &Path) -> Result<ProcessSpec> {
        let args = vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-i".to_string(),
            self.input.display().to_string(),
            "-c:v".to_string(),
            codec_arg(self.opts.codec).to_string(),
            "-crf".to_string(),
            self.opts.crf.to_string(),
            "-progress".to_string(),
            "pipe:1".to_string(),
            "-y".to_string(),
            self.output.display().to_string(),
        ];
        Ok(ProcessSpec {
            program: self.ffmpeg.clone(),
            args,
            env: Vec::new(),
            cwd: work_dir.to_path_buf(),
        })
    }

    fn parse_line(&self, line: &str, ctx: &mut ParseCtx) -> Option<ProgressDelta> {
        let caps = out_time_re().captures(line.trim())?;
        let out_us: u64 = caps.name("us")?.as_str().parse().ok()?;
        let total_us = ctx.total_duration_us?;
        if total_us == 0 {
            return None;
        }
        let pct = (100.0 * out_us as f64 / total_us as f64).min(100.0);
        Some(ProgressDelta {
            progress: Some(pct),
            stage: JobStage::Transcode,
            speed: None,
            eta_secs: None,
            total_bytes: None,
            message: None,
        })
    }

    fn classify_error(&self, _exit_code: Option<i32>, stderr_tail: &str) -> ErrorCode {
        let tail = stderr_tail.to_ascii_lowercase();
        if tail.contains("no space left") {
            ErrorCode::DiskFull
        } else if tail.contains("invalid data found")
            || tail.contains("moov atom not found")
            || tail.contains("unknown encoder")
            || tail.contains("invalid argument")
        {
            ErrorCode::FormatError
        } else {
            ErrorCode::InternalError
        }
    }

    fn collect_artifact(&self, _work_dir: &Path) -> Result<Artifact> {
        let meta = std::fs::metadata(&self.output)
            .with_context(|| format!("transcode output missing: {}", self.output.display()))?;
        let filename = self
            .output
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("transcoded.mp4")
            .to_string();
        Ok(Artifact {
            filename,
            path: self.output.clone(),
            size: meta.len(),
        })
    }
}

/// Probe the input duration in microseconds via ffprobe (resolved as a
/// sibling of the configured ffmpeg binary).
pub async fn probe_duration_us(ffmpeg: &Path, input: &Path) -> Result<u64> {
    let ffprobe = match ffmpeg.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join("ffprobe"),
        _ => PathBuf::from("ffprobe"),
    };
    let output = tokio::process::Command::new(&ffprobe)
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(input)
        .output()
        .await
        .with_context(|| format!("run ffprobe: {}", ffprobe.display()))?;
    if !output.status.success() {
        anyhow::bail!(
            "ffprobe failed on {}: {}",
            input.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    let seconds: f64 = String::from_utf8_lossy(&output.stdout)
        .trim()
        .parse()
        .context("parse ffprobe duration")?;
    Ok((seconds * 1_000_000.0) as u64)
}
