//! Job entity, enums, and submission options.

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;

/// Opaque job identifier (UUID v4 rendered as a string).
pub type JobId = String;

pub fn new_job_id() -> JobId {
    uuid::Uuid::new_v4().to_string()
}

/// What kind of resource the URL points at; decides the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Auto,
    File,
    Hls,
    Youtube,
    Twitter,
    Pinterest,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Auto => "auto",
            JobKind::File => "file",
            JobKind::Hls => "hls",
            JobKind::Youtube => "youtube",
            JobKind::Twitter => "twitter",
            JobKind::Pinterest => "pinterest",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(JobKind::Auto),
            "file" => Some(JobKind::File),
            "hls" => Some(JobKind::Hls),
            "youtube" => Some(JobKind::Youtube),
            "twitter" => Some(JobKind::Twitter),
            "pinterest" => Some(JobKind::Pinterest),
            _ => None,
        }
    }
}

/// Lifecycle state of a job. Transitions are enforced by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "paused" => Some(JobStatus::Paused),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal states can only be left through an explicit retry reset.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether `self -> next` is a legal state-machine edge.
    ///
    /// `running -> queued` covers crash recovery and broker-driven retries;
    /// `failed/cancelled -> queued` only happens through the retry reset,
    /// which also clears progress and error fields.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Queued, Running) | (Queued, Cancelled) => true,
            (Running, Paused)
            | (Running, Cancelled)
            | (Running, Completed)
            | (Running, Failed)
            | (Running, Queued) => true,
            (Paused, Queued) | (Paused, Cancelled) => true,
            (Failed, Queued) | (Cancelled, Queued) => true,
            _ => false,
        }
    }
}

/// Advisory phase while a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStage {
    Queue,
    Download,
    Merge,
    Transcode,
    Finalize,
    Completed,
}

impl JobStage {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStage::Queue => "queue",
            JobStage::Download => "download",
            JobStage::Merge => "merge",
            JobStage::Transcode => "transcode",
            JobStage::Finalize => "finalize",
            JobStage::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queue" => Some(JobStage::Queue),
            "download" => Some(JobStage::Download),
            "merge" => Some(JobStage::Merge),
            "transcode" => Some(JobStage::Transcode),
            "finalize" => Some(JobStage::Finalize),
            "completed" => Some(JobStage::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscodeContainer {
    Mp4,
    Webm,
    Avi,
}

impl TranscodeContainer {
    pub fn extension(self) -> &'static str {
        match self {
            TranscodeContainer::Mp4 => "mp4",
            TranscodeContainer::Webm => "webm",
            TranscodeContainer::Avi => "avi",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscodeCodec {
    H264,
    H265,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodeOptions {
    pub to: TranscodeContainer,
    pub codec: TranscodeCodec,
    pub crf: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TwitterMediaType {
    All,
    Images,
    Videos,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TwitterOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tweet_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub media_type: TwitterMediaType,
    #[serde(default)]
    pub include_retweets: bool,
    pub max_tweets: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinterestOptions {
    pub max_images: u32,
    #[serde(default)]
    pub include_videos: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ua: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,
    /// Extra request headers; keys must come from the submit allow-list.
    #[serde(default, skip_serializing_if = "std::collections::HashMap::is_empty")]
    pub extra: std::collections::HashMap<String, String>,
}

/// Submission payload. Immutable once the job row exists; stored as JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<HeaderOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcode: Option<TranscodeOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename_hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub twitter: Option<TwitterOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pinterest: Option<PinterestOptions>,
}

/// One row of the `jobs` table.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub url: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub stage: Option<JobStage>,
    pub progress: f64,
    pub speed: Option<String>,
    pub eta_secs: Option<i64>,
    pub total_bytes: Option<i64>,
    pub filename: Option<String>,
    pub output_path: Option<String>,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    pub options: SubmitOptions,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Job {
    /// Fresh queued job as produced by submit.
    pub fn new_queued(url: String, kind: JobKind, options: SubmitOptions) -> Self {
        let now = crate::util::unix_timestamp();
        Self {
            id: new_job_id(),
            url,
            kind,
            status: JobStatus::Queued,
            stage: None,
            progress: 0.0,
            speed: None,
            eta_secs: None,
            total_bytes: None,
            filename: None,
            output_path: None,
            error_code: None,
            error_message: None,
            options,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Progress-class fields written by the throttled pipeline. Never touches
/// status.
#[derive(Debug, Clone, Default)]
pub struct ProgressUpdate {
    pub progress: Option<f64>,
    pub stage: Option<JobStage>,
    pub speed: Option<String>,
    pub eta_secs: Option<i64>,
    pub total_bytes: Option<i64>,
}

/// Filter for paginated listings.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub kind: Option<JobKind>,
    /// Case-insensitive substring over url and filename.
    pub search: Option<String>,
    pub offset: i64,
    /// 0 means "no limit".
    pub limit: i64,
}
