//! Global configuration: TOML file under the XDG config dir plus environment
//! overrides.
//!
//! The file is created with defaults on first run. Environment variables win
//! over file values so containerized deployments can configure everything
//! without a mounted config. The resulting `MdmConfig` is immutable; every
//! component receives it by reference at construction.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Paths and endpoints of the external tools the adapters drive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    /// yt-dlp binary (youtube and hls kinds).
    pub ytdlp: PathBuf,
    /// ffmpeg binary (transcode phase); ffprobe is resolved as its sibling.
    pub ffmpeg: PathBuf,
    /// aria2c JSON-RPC endpoint (file kind).
    pub aria2_rpc_url: String,
    /// aria2c RPC secret, if the daemon requires one.
    pub aria2_secret: Option<String>,
    /// twmd binary (twitter kind).
    pub twmd: PathBuf,
    /// pinterest-dl binary (pinterest kind).
    pub pinterest_dl: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ytdlp: PathBuf::from("yt-dlp"),
            ffmpeg: PathBuf::from("ffmpeg"),
            aria2_rpc_url: "http://127.0.0.1:6800/jsonrpc".to_string(),
            aria2_secret: None,
            twmd: PathBuf::from("twmd"),
            pinterest_dl: PathBuf::from("pinterest-dl"),
        }
    }
}

/// Global configuration for the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MdmConfig {
    /// Global worker-slot count: at most this many jobs run at once.
    pub max_concurrent_jobs: usize,
    /// Progress-to-store throttle interval in milliseconds (clamped 100..=1000).
    pub progress_throttle_ms: u64,
    /// Hard per-job deadline in milliseconds.
    pub job_timeout_ms: u64,
    /// Watchdog: kill the child after this long without a progress change.
    pub watchdog_stall_ms: u64,
    /// Grace period between SIGTERM and SIGKILL on cancellation.
    pub grace_timeout_ms: u64,
    /// RPC poll interval for control-plane downloaders.
    pub poll_interval_ms: u64,
    /// Root for completed outputs: `<data_dir>/<job_id>/<filename>`.
    pub data_dir: PathBuf,
    /// Root for per-job scratch directories while a job runs.
    pub temp_dir: PathBuf,
    /// Shared secret for the worker/control channel. Connections that fail
    /// the token handshake are closed immediately.
    pub worker_token: Option<String>,
    /// Origins allowed by HTTP/WebSocket front-ends (consumed there, carried
    /// here so all config lives in one place).
    pub allowed_origins: Vec<String>,
    pub tools: ToolPaths,
}

impl Default for MdmConfig {
    fn default() -> Self {
        let data_root = xdg_data_root();
        Self {
            max_concurrent_jobs: 3,
            progress_throttle_ms: 300,
            job_timeout_ms: 7_200_000,
            watchdog_stall_ms: 60_000,
            grace_timeout_ms: 5_000,
            poll_interval_ms: 2_000,
            data_dir: data_root.join("data"),
            temp_dir: data_root.join("tmp"),
            worker_token: None,
            allowed_origins: Vec::new(),
            tools: ToolPaths::default(),
        }
    }
}

fn xdg_data_root() -> PathBuf {
    xdg::BaseDirectories::with_prefix("mdm")
        .map(|d| d.get_data_home())
        .unwrap_or_else(|_| PathBuf::from("/var/lib/mdm"))
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("mdm")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// XDG state dir holding the jobs database, logs, and control socket.
pub fn state_dir() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("mdm")?;
    Ok(xdg_dirs.get_state_home())
}

/// Default path of the jobs database.
pub fn default_db_path() -> Result<PathBuf> {
    Ok(state_dir()?.join("jobs.db"))
}

/// Load configuration: file (created with defaults if absent), then
/// environment overrides.
pub fn load_or_init() -> Result<MdmConfig> {
    let path = config_path()?;
    let mut cfg = if path.exists() {
        let data = fs::read_to_string(&path)
            .with_context(|| format!("read config: {}", path.display()))?;
        toml::from_str(&data).with_context(|| format!("parse config: {}", path.display()))?
    } else {
        let default_cfg = MdmConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        default_cfg
    };
    cfg.apply_env_overrides();
    Ok(cfg)
}

impl MdmConfig {
    pub fn throttle_interval(&self) -> Duration {
        Duration::from_millis(self.progress_throttle_ms.clamp(100, 1000))
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }

    pub fn watchdog_stall(&self) -> Duration {
        Duration::from_millis(self.watchdog_stall_ms)
    }

    pub fn grace_timeout(&self) -> Duration {
        Duration::from_millis(self.grace_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Apply the recognized environment variables over file values.
    pub fn apply_env_overrides(&mut self) {
        if let Some(n) = env_parse::<usize>("MAX_CONCURRENT_JOBS") {
            self.max_concurrent_jobs = n.max(1);
        }
        if let Some(n) = env_parse::<u64>("PROGRESS_THROTTLE_MS") {
            self.progress_throttle_ms = n;
        }
        if let Some(n) = env_parse::<u64>("JOB_TIMEOUT_MS") {
            self.job_timeout_ms = n;
        }
        if let Some(n) = env_parse::<u64>("WATCHDOG_STALL_MS") {
            self.watchdog_stall_ms = n;
        }
        if let Some(p) = env_path("DATA_DIR") {
            self.data_dir = p;
        }
        if let Some(p) = env_path("TEMP_DIR") {
            self.temp_dir = p;
        }
        if let Ok(token) = std::env::var("WORKER_TOKEN") {
            if !token.is_empty() {
                self.worker_token = Some(token);
            }
        }
        if let Ok(origins) = std::env::var("ALLOWED_ORIGINS") {
            self.allowed_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(p) = env_path("YTDLP_PATH") {
            self.tools.ytdlp = p;
        }
        if let Some(p) = env_path("FFMPEG_PATH") {
            self.tools.ffmpeg = p;
        }
        if let Ok(u) = std::env::var("ARIA2_RPC_URL") {
            if !u.is_empty() {
                self.tools.aria2_rpc_url = u;
            }
        }
        if let Ok(s) = std::env::var("ARIA2_SECRET") {
            if !s.is_empty() {
                self.tools.aria2_secret = Some(s);
            }
        }
        if let Some(p) = env_path("TWMD_PATH") {
            self.tools.twmd = p;
        }
        if let Some(p) = env_path("PINTEREST_DL_PATH") {
            self.tools.pinterest_dl = p;
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("ignoring unparseable {}={}", name, raw);
            None
        }
    }
}

fn env_path(name: &str) -> Option<PathBuf> {
    let raw = std::env::var(name).ok()?;
    if raw.is_empty() {
        return None;
    }
    Some(PathBuf::from(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = MdmConfig::default();
        assert_eq!(cfg.max_concurrent_jobs, 3);
        assert_eq!(cfg.progress_throttle_ms, 300);
        assert_eq!(cfg.job_timeout_ms, 7_200_000);
        assert_eq!(cfg.watchdog_stall_ms, 60_000);
        assert_eq!(cfg.grace_timeout_ms, 5_000);
        assert_eq!(cfg.poll_interval_ms, 2_000);
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = MdmConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: MdmConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.max_concurrent_jobs, cfg.max_concurrent_jobs);
        assert_eq!(parsed.tools.aria2_rpc_url, cfg.tools.aria2_rpc_url);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let toml = r#"
            max_concurrent_jobs = 5
            [tools]
            ytdlp = "/opt/yt-dlp"
        "#;
        let cfg: MdmConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.max_concurrent_jobs, 5);
        assert_eq!(cfg.tools.ytdlp, PathBuf::from("/opt/yt-dlp"));
        assert_eq!(cfg.progress_throttle_ms, 300);
    }

    #[test]
    fn throttle_interval_clamped() {
        let mut cfg = MdmConfig::default();
        cfg.progress_throttle_ms = 10;
        assert_eq!(cfg.throttle_interval(), Duration::from_millis(100));
        cfg.progress_throttle_ms = 5_000;
        assert_eq!(cfg.throttle_interval(), Duration::from_millis(1000));
        cfg.progress_throttle_ms = 300;
        assert_eq!(cfg.throttle_interval(), Duration::from_millis(300));
    }
}
