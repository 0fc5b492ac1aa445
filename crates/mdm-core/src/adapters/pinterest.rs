//! pinterest-dl adapter: board and pin scraping.
//!
//! Progress comes from explicit "NN%" markers when the tool prints them,
//! otherwise from "[done/total]" counters, both capped below 100 mid-run.

use anyhow::Result;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use super::twitter::{count_progress, COUNT_PROGRESS_CAP};
use super::{collect_dir, Artifact, LineAdapter, ParseCtx, ProcessSpec, ProgressDelta};
use crate::error::ErrorCode;
use crate::job_store::{Job, JobStage};

const IMAGES_SUBDIR: &str = "images";

pub struct PinterestAdapter {
    binary: PathBuf,
}

impl PinterestAdapter {
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }
}

fn percent_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?P<pct>\d{1,3})%").unwrap())
}

fn counter_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(?P<done>\d+)\s*/\s*(?P<total>\d+)\]").unwrap())
}

impl LineAdapter for PinterestAdapter {
    fn build(&self, job: &Job, work_dir: &Path) -> Result<ProcessSpec> {
        let opts = job
            .options
            .pinterest
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("pinterest job without pinterest options"))?;

        let out_dir = work_dir.join(IMAGES_SUBDIR);
        let mut args = vec![
            "scrape".to_string(),
            job.url.clone(),
            "-o".to_string(),
            out_dir.display().to_string(),
            "-n".to_string(),
            opts.max_images.to_string(),
        ];
        if let Some(resolution) = opts.resolution.as_deref() {
            args.push("-r".to_string());
            args.push(resolution.to_string());
        }
        if opts.include_videos {
            args.push("--video".to_string());
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
        if let Some(caps) = percent_re().captures(line) {
            let pct: f64 = caps.name("pct")?.as_str().parse().ok()?;
            if pct <= 100.0 {
                return Some(ProgressDelta {
                    progress: Some(pct.min(COUNT_PROGRESS_CAP)),
                    stage: JobStage::Download,
                    speed: None,
                    eta_secs: None,
                    total_bytes: None,
                    message: None,
                });
            }
        }
        None
    }

    fn classify_error(&self, _exit_code: Option<i32>, stderr_tail: &str) -> ErrorCode {
        let tail = stderr_tail.to_ascii_lowercase();
        if tail.contains("no images") || tail.contains("no pins found") || tail.contains("empty board")
        {
            ErrorCode::NoImagesFound
        } else if tail.contains("invalid url") || tail.contains("not a pinterest") {
            ErrorCode::InvalidUrl
        } else if tail.contains("login") || tail.contains("authorization") {
            ErrorCode::AuthRequired
        } else if tail.contains("timeout") || tail.contains("connection") || tail.contains("network")
        {
            ErrorCode::NetworkError
        } else {
            ErrorCode::InternalError
        }
    }

    fn collect_artifact(&self, work_dir: &Path) -> Result<Artifact> {
        collect_dir(&work_dir.join(IMAGES_SUBDIR))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_store::{JobKind, PinterestOptions, SubmitOptions};

    fn adapter() -> PinterestAdapter {
        PinterestAdapter::new(PathBuf::from("pinterest-dl"))
    }

    #[test]
    fn percent_markers() {
        let mut ctx = ParseCtx::default();
        let delta = adapter().parse_line("Downloading images: 45%", &mut ctx).unwrap();
        assert_eq!(delta.progress, Some(45.0));

        // 100% mid-run stays capped; the terminal write owns the jump.
        let delta = adapter().parse_line("Downloading images: 100%", &mut ctx).unwrap();
        assert_eq!(delta.progress, Some(COUNT_PROGRESS_CAP));
    }

    #[test]
    fn counter_markers() {
        let mut ctx = ParseCtx::default();
        let delta = adapter().parse_line("[12/100] board_photo.jpg", &mut ctx).unwrap();
        assert_eq!(delta.progress, Some(12.0));
        assert_eq!(ctx.expected_items, Some(100));
    }

    #[test]
    fn noise_ignored() {
        let mut ctx = ParseCtx::default();
        assert!(adapter().parse_line("Scraping board metadata...", &mut ctx).is_none());
    }

    #[test]
    fn build_flags() {
        let job = Job::new_queued(
            "https://www.pinterest.com/user/board/".to_string(),
            JobKind::Pinterest,
            SubmitOptions {
                pinterest: Some(PinterestOptions {
                    max_images: 200,
                    include_videos: true,
                    resolution: Some("1920x1080".to_string()),
                }),
                ..Default::default()
            },
        );
        let spec = adapter().build(&job, Path::new("/tmp/w")).unwrap();
        let args = spec.args.join(" ");
        assert!(args.starts_with("scrape https://www.pinterest.com/user/board/"));
        assert!(args.contains("-n 200"));
        assert!(args.contains("-r 1920x1080"));
        assert!(args.contains("--video"));
    }

    #[test]
    fn classification_table() {
        let a = adapter();
        assert_eq!(a.classify_error(Some(1), "Error: no images found"), ErrorCode::NoImagesFound);
        assert_eq!(a.classify_error(Some(1), "invalid url supplied"), ErrorCode::InvalidUrl);
        assert_eq!(a.classify_error(Some(1), "connection refused"), ErrorCode::NetworkError);
    }
}
