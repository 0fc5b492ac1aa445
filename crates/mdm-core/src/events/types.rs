//! Typed event payloads delivered to room subscribers.
//!
//! Field names follow the wire shape front-ends consume, so these serialize
//! directly into the JSON a WebSocket layer forwards.

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressPayload {
    pub job_id: String,
    pub stage: String,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogPayload {
    pub job_id: String,
    /// Unix milliseconds.
    pub timestamp: i64,
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPayload {
    pub job_id: String,
    pub filename: String,
    pub size: u64,
    pub output_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedPayload {
    pub job_id: String,
    pub error_code: ErrorCode,
    pub message: String,
}

/// Coarse aggregate update: any subset of status/stage/progress changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobUpdatePayload {
    pub job_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
}

/// Every event the bus carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum JobEvent {
    Progress(ProgressPayload),
    Log(LogPayload),
    Completed(CompletedPayload),
    Failed(FailedPayload),
    JobUpdate(JobUpdatePayload),
}

impl JobEvent {
    /// Wire name of the event type.
    pub fn kind(&self) -> &'static str {
        match self {
            JobEvent::Progress(_) => "progress",
            JobEvent::Log(_) => "log",
            JobEvent::Completed(_) => "completed",
            JobEvent::Failed(_) => "failed",
            JobEvent::JobUpdate(_) => "job-update",
        }
    }

    /// Job the event belongs to.
    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::Progress(p) => &p.job_id,
            JobEvent::Log(p) => &p.job_id,
            JobEvent::Completed(p) => &p.job_id,
            JobEvent::Failed(p) => &p.job_id,
            JobEvent::JobUpdate(p) => &p.job_id,
        }
    }

    /// Terminal events are the last thing a run emits.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Completed(_) | JobEvent::Failed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_serializes_camel_case() {
        let event = JobEvent::Completed(CompletedPayload {
            job_id: "j1".to_string(),
            filename: "video.mp4".to_string(),
            size: 1024,
            output_path: "/data/j1/video.mp4".to_string(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "completed");
        assert_eq!(json["payload"]["jobId"], "j1");
        assert_eq!(json["payload"]["outputPath"], "/data/j1/video.mp4");
    }

    #[test]
    fn failed_carries_stable_error_code() {
        let event = JobEvent::Failed(FailedPayload {
            job_id: "j1".to_string(),
            error_code: ErrorCode::VideoUnavailable,
            message: "gone".to_string(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["payload"]["errorCode"], "VIDEO_UNAVAILABLE");
    }

    #[test]
    fn kind_names() {
        let update = JobEvent::JobUpdate(JobUpdatePayload {
            job_id: "j1".to_string(),
            status: Some("running".to_string()),
            stage: None,
            progress: None,
        });
        assert_eq!(update.kind(), "job-update");
        assert!(!update.is_terminal());
    }
}
