//! twmd adapter: twitter/X media.
//!
//! The tool prints per-file counters rather than byte totals, so progress is
//! a count-based estimate capped at 95; the jump to 100 happens only at the
//! terminal write.

use anyhow::Result;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use super::{collect_dir, Artifact, LineAdapter, ParseCtx, ProcessSpec, ProgressDelta};
use crate::error::ErrorCode;
use crate::job_store::{Job, JobStage, TwitterMediaType};

/// Cap for count-based estimates; keeps "completed implies 100" intact even
/// when the tool's counters overshoot.
pub(crate) const COUNT_PROGRESS_CAP: f64 = 95.0;

const MEDIA_SUBDIR: &str = "media";

pub struct TwitterAdapter {
    binary: PathBuf,
}

impl TwitterAdapter {
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }
}

fn counter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Matches "Downloading (3/10)", "[3/10] photo.jpg", "Downloaded 3/10".
    RE.get_or_init(|| Regex::new(r"(?i)(?:download|\[)\D*(?P<done>\d+)\s*/\s*(?P<total>\d+)").unwrap())
}

fn saved_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(?:saved|wrote):?\s+(?P<file>\S+)").unwrap())
}

pub(crate) fn count_progress(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (100.0 * done as f64 / total as f64).min(COUNT_PROGRESS_CAP)
}

impl LineAdapter for TwitterAdapter {
    fn build(&self, job: &Job, work_dir: &Path) -> Result<ProcessSpec> {
        let opts = job
            .options
            .twitter
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("twitter job without twitter options"))?;

        let out_dir = work_dir.join(MEDIA_SUBDIR);
        let mut args = vec!["-o".to_string(), out_dir.display().to_string()];
        match (&opts.tweet_id, &opts.username) {
            (Some(id), _) => {
                args.push("-t".to_string());
                args.push(id.clone());
            }
            (None, Some(user)) => {
                args.push("-u".to_string());
                args.push(user.clone());
            }
            (None, None) => anyhow::bail!("twitter options need a tweet id or username"),
        }
        args.push("-n".to_string());
        args.push(opts.max_tweets.to_string());
        match opts.media_type {
            TwitterMediaType::Images => args.push("-i".to_string()),
            TwitterMediaType::Videos => args.push("-v".to_string()),
            TwitterMediaType::All => {
                args.push("-i".to_string());
                args.push("-v".to_string());
            }
        }
        if opts.include_retweets {
            args.push("-r".to_string());
        }

        Ok(ProcessSpec {
            program: self.binary.clone(),
            args,
            env: Vec::new(),
            cwd: work_dir.to_path_buf(),
        })
    }

    fn parse_line(&self, line: &str, ctx: &mut ParseCtx) -> Option<ProgressDelta> {
        if let Some(caps) = counter_re().captures(line) {
            let done: u64 = caps.name("done")?.as_str().parse().ok()?;
            let total: u64 = caps.name("total")?.as_str().parse().ok()?;
            ctx.items_done = done;
            ctx.expected_items = Some(total);
            return Some(ProgressDelta {
                progress: Some(count_progress(done, total)),
                stage: JobStage::Download,
                speed: None,
                eta_secs: None,
                total_bytes: None,
                message: None,
            });
        }
        if saved_re().is_match(line) {
            // Some builds only print one "Saved" line per file.
            ctx.items_done += 1;
            let progress = ctx
                .expected_items
                .map(|total| count_progress(ctx.items_done, total));
            return Some(ProgressDelta {
                progress,
                stage: JobStage::Download,
                speed: None,
                eta_secs: None,
                total_bytes: None,
                message: None,
            });
        }
        None
    }

    fn classify_error(&self, _exit_code: Option<i32>, stderr_tail: &str) -> ErrorCode {
        let tail = stderr_tail.to_ascii_lowercase();
        if tail.contains("user not found") || tail.contains("account doesn't exist") {
            ErrorCode::UserNotFound
        } else if tail.contains("tweet not found")
            || tail.contains("tweet unavailable")
            || tail.contains("protected tweets")
        {
            ErrorCode::TweetUnavailable
        } else if tail.contains("no media") || tail.contains("nothing to download") {
            ErrorCode::NoImagesFound
        } else if tail.contains("login") || tail.contains("authorization") || tail.contains("cookie")
        {
            ErrorCode::AuthRequired
        } else if tail.contains("rate limit")
            || tail.contains("timeout")
            || tail.contains("connection")
        {
            ErrorCode::NetworkError
        } else {
            ErrorCode::InternalError
        }
    }

    fn collect_artifact(&self, work_dir: &Path) -> Result<Artifact> {
        collect_dir(&work_dir.join(MEDIA_SUBDIR))
    }
}
