//! Stable error codes returned to clients on job failure.
//!
//! The set is closed: adapters map tool output onto these identifiers and the
//! broker consults `retry_eligible` before scheduling another attempt.

use serde::{Deserialize, Serialize};

/// Terminal failure classification for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "INVALID_INPUT")]
    InvalidInput,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "ILLEGAL_TRANSITION")]
    IllegalTransition,
    #[serde(rename = "VIDEO_UNAVAILABLE")]
    VideoUnavailable,
    #[serde(rename = "NETWORK_ERROR")]
    NetworkError,
    #[serde(rename = "FORMAT_ERROR")]
    FormatError,
    #[serde(rename = "AUTH_REQUIRED")]
    AuthRequired,
    #[serde(rename = "NO_IMAGES_FOUND")]
    NoImagesFound,
    #[serde(rename = "TWEET_UNAVAILABLE")]
    TweetUnavailable,
    #[serde(rename = "USER_NOT_FOUND")]
    UserNotFound,
    #[serde(rename = "INVALID_URL")]
    InvalidUrl,
    #[serde(rename = "WATCHDOG_STALL")]
    WatchdogStall,
    #[serde(rename = "TIMEOUT")]
    Timeout,
    #[serde(rename = "DISK_FULL")]
    DiskFull,
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::IllegalTransition => "ILLEGAL_TRANSITION",
            ErrorCode::VideoUnavailable => "VIDEO_UNAVAILABLE",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::FormatError => "FORMAT_ERROR",
            ErrorCode::AuthRequired => "AUTH_REQUIRED",
            ErrorCode::NoImagesFound => "NO_IMAGES_FOUND",
            ErrorCode::TweetUnavailable => "TWEET_UNAVAILABLE",
            ErrorCode::UserNotFound => "USER_NOT_FOUND",
            ErrorCode::InvalidUrl => "INVALID_URL",
            ErrorCode::WatchdogStall => "WATCHDOG_STALL",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::DiskFull => "DISK_FULL",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Parse a stored identifier. Unknown identifiers map to `InternalError`
    /// so old rows never fail to load.
    pub fn parse(s: &str) -> Self {
        match s {
            "INVALID_INPUT" => ErrorCode::InvalidInput,
            "NOT_FOUND" => ErrorCode::NotFound,
            "ILLEGAL_TRANSITION" => ErrorCode::IllegalTransition,
            "VIDEO_UNAVAILABLE" => ErrorCode::VideoUnavailable,
            "NETWORK_ERROR" => ErrorCode::NetworkError,
            "FORMAT_ERROR" => ErrorCode::FormatError,
            "AUTH_REQUIRED" => ErrorCode::AuthRequired,
            "NO_IMAGES_FOUND" => ErrorCode::NoImagesFound,
            "TWEET_UNAVAILABLE" => ErrorCode::TweetUnavailable,
            "USER_NOT_FOUND" => ErrorCode::UserNotFound,
            "INVALID_URL" => ErrorCode::InvalidUrl,
            "WATCHDOG_STALL" => ErrorCode::WatchdogStall,
            "TIMEOUT" => ErrorCode::Timeout,
            "DISK_FULL" => ErrorCode::DiskFull,
            _ => ErrorCode::InternalError,
        }
    }

    /// Whether the broker may schedule another attempt for this failure.
    ///
    /// `InternalError` is eligible so a transient bug gets one more attempt;
    /// the broker's attempt cap keeps it from looping.
    pub fn retry_eligible(self) -> bool {
        matches!(
            self,
            ErrorCode::NetworkError
                | ErrorCode::WatchdogStall
                | ErrorCode::DiskFull
                | ErrorCode::InternalError
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
