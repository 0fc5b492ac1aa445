//! Shell-script-backed adapter: exercises the full child-process path
//! (spawn, line readers, watchdog, kill, artifact collection) without any
//! real downloader installed.
//!
//! The script runs with the per-job temp dir as its working directory and
//! reports progress by printing `PROGRESS <n>` lines.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use mdm_core::adapters::{
    Adapter, Artifact, LineAdapter, ParseCtx, ProcessSpec, ProgressDelta,
};
use mdm_core::error::ErrorCode;
use mdm_core::job_store::{Job, JobStage};
use mdm_core::orchestrator::AdapterFactory;

pub struct ScriptAdapter {
    script: String,
    artifact_name: String,
}

impl ScriptAdapter {
    pub fn new(script: impl Into<String>, artifact_name: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            artifact_name: artifact_name.into(),
        }
    }

    /// Factory handing every job the same script.
    pub fn factory(script: impl Into<String>, artifact_name: impl Into<String>) -> AdapterFactory {
        let script = script.into();
        let artifact_name = artifact_name.into();
        Box::new(move |_job, _cfg| {
            Ok(Adapter::Line(Box::new(ScriptAdapter::new(
                script.clone(),
                artifact_name.clone(),
            ))))
        })
    }
}

impl LineAdapter for ScriptAdapter {
    fn build(&self, _job: &Job, work_dir: &Path) -> Result<ProcessSpec> {
        Ok(ProcessSpec {
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), self.script.clone()],
            env: Vec::new(),
            cwd: work_dir.to_path_buf(),
        })
    }

    fn parse_line(&self, line: &str, _ctx: &mut ParseCtx) -> Option<ProgressDelta> {
        let value = line.trim().strip_prefix("PROGRESS ")?;
        Some(ProgressDelta {
            progress: value.trim().parse().ok(),
            stage: JobStage::Download,
            speed: None,
            eta_secs: None,
            total_bytes: None,
            message: None,
        })
    }

    fn classify_error(&self, _exit_code: Option<i32>, stderr_tail: &str) -> ErrorCode {
        let tail = stderr_tail.to_ascii_lowercase();
        if tail.contains("network") {
            ErrorCode::NetworkError
        } else if tail.contains("gone") {
            ErrorCode::VideoUnavailable
        } else {
            ErrorCode::InternalError
        }
    }

    fn collect_artifact(&self, work_dir: &Path) -> Result<Artifact> {
        let path = work_dir.join(&self.artifact_name);
        let meta = std::fs::metadata(&path)
            .with_context(|| format!("script produced no {}", path.display()))?;
        Ok(Artifact {
            filename: self.artifact_name.clone(),
            path,
            size: meta.len(),
        })
    }
}
