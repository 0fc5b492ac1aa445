//! aria2 adapter: plain HTTP(S) file downloads over the daemon's JSON-RPC
//! control channel.
//!
//! The supervisor polls `tellStatus` and converts each snapshot into a
//! progress delta; the daemon does the actual transfer.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use super::{
    collect_largest_file, Artifact, PollAdapter, PollHandle, PollSnapshot, PollState,
};
use crate::error::ErrorCode;
use crate::job_store::Job;

pub struct Aria2Adapter {
    client: reqwest::Client,
    rpc_url: String,
    secret: Option<String>,
}

impl Aria2Adapter {
    pub fn new(rpc_url: String, secret: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            rpc_url,
            secret,
        }
    }

    async fn call(&self, method: &str, mut params: Vec<Value>) -> Result<Value> {
        if let Some(secret) = self.secret.as_deref() {
            params.insert(0, json!(format!("token:{}", secret)));
        }
        let body = json!({
            "jsonrpc": "2.0",
            "id": "mdm",
            "method": method,
            "params": params,
        });
        let response: Value = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("aria2 rpc {} unreachable", self.rpc_url))?
            .json()
            .await
            .context("aria2 rpc returned non-json")?;
        if let Some(error) = response.get("error") {
            anyhow::bail!(
                "aria2 {} failed: {}",
                method,
                error.get("message").and_then(Value::as_str).unwrap_or("?")
            );
        }
        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }
}

/// aria2 reports numbers as decimal strings.
fn num(value: &Value, key: &str) -> u64 {
    value
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

fn parse_state(status: &str) -> PollState {
    match status {
        "active" => PollState::Active,
        "waiting" | "paused" => PollState::Waiting,
        "complete" => PollState::Complete,
        "removed" => PollState::Removed,
        _ => PollState::Error,
    }
}

pub(crate) fn snapshot_from_status(result: &Value) -> PollSnapshot {
    let files = result
        .get("files")
        .and_then(Value::as_array)
        .map(|files| {
            files
                .iter()
                .filter_map(|f| f.get("path").and_then(Value::as_str))
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .collect()
        })
        .unwrap_or_default();
    PollSnapshot {
        state: result
            .get("status")
            .and_then(Value::as_str)
            .map(parse_state)
            .unwrap_or(PollState::Error),
        completed_bytes: num(result, "completedLength"),
        total_bytes: num(result, "totalLength"),
        speed_bps: num(result, "downloadSpeed"),
        error_message: result
            .get("errorMessage")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from),
        files,
    }
}

#[async_trait]
impl PollAdapter for Aria2Adapter {
    async fn start(&self, job: &Job, work_dir: &Path) -> Result<PollHandle> {
        let mut options = json!({
            "dir": work_dir.display().to_string(),
        });
        if let Some(hint) = job.options.filename_hint.as_deref() {
            options["out"] = json!(hint);
        }
        if let Some(headers) = job.options.headers.as_ref() {
            let mut header_lines: Vec<String> = headers
                .extra
                .iter()
                .map(|(name, value)| format!("{}: {}", name, value))
                .collect();
            if let Some(referer) = headers.referer.as_deref() {
                header_lines.push(format!("Referer: {}", referer));
            }
            if !header_lines.is_empty() {
                options["header"] = json!(header_lines);
            }
            if let Some(ua) = headers.ua.as_deref() {
                options["user-agent"] = json!(ua);
            }
        }

        let gid = self
            .call("aria2.addUri", vec![json!([job.url]), options])
            .await?;
        let gid = gid
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("aria2.addUri returned no gid"))?
            .to_string();
        Ok(PollHandle(gid))
    }

    async fn poll(&self, handle: &PollHandle) -> Result<PollSnapshot> {
        let result = self
            .call(
                "aria2.tellStatus",
                vec![
                    json!(handle.0),
                    json!([
                        "status",
                        "completedLength",
                        "totalLength",
                        "downloadSpeed",
                        "errorMessage",
                        "files"
                    ]),
                ],
            )
            .await?;
        Ok(snapshot_from_status(&result))
    }

    async fn cancel(&self, handle: &PollHandle) -> Result<()> {
        // forceRemove also drops a stalled transfer that ignores remove.
        if self
            .call("aria2.remove", vec![json!(handle.0)])
            .await
            .is_err()
        {
            let _ = self.call("aria2.forceRemove", vec![json!(handle.0)]).await;
        }
        Ok(())
    }

    fn classify_error(&self, message: &str) -> ErrorCode {
        let message = message.to_ascii_lowercase();
        if message.contains("authorization") || message.contains("401") || message.contains("403") {
            ErrorCode::AuthRequired
        } else if message.contains("404") || message.contains("not found") {
            ErrorCode::VideoUnavailable
        } else if message.contains("no space left") || message.contains("disk") {
            ErrorCode::DiskFull
        } else {
            ErrorCode::NetworkError
        }
    }

    fn collect_artifact(&self, work_dir: &Path, snapshot: &PollSnapshot) -> Result<Artifact> {
        if let Some(path) = snapshot.files.first() {
            if let Ok(meta) = std::fs::metadata(path) {
                let filename = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("download.bin")
                    .to_string();
                return Ok(Artifact {
                    filename,
                    path: path.clone(),
                    size: meta.len(),
                });
            }
        }
        collect_largest_file(work_dir)
    }
}
