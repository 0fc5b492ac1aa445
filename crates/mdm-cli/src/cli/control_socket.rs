//! Control socket: server (during `mdm run`) and client (for `mdm cancel` /
//! `mdm pause` issued from another process).
//!
//! Protocol: when a worker token is configured the first line must be
//! `x-worker-token <token>`; connections that fail the handshake are closed
//! immediately. Then one line per command: "cancel <id>" or "pause <id>".

use anyhow::Result;
use mdm_core::orchestrator::Orchestrator;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;

/// Default path for the control socket (same XDG state dir as the DB).
pub fn default_socket_path() -> Result<PathBuf> {
    Ok(mdm_core::config::state_dir()?.join("control.sock"))
}

/// Spawns a task that listens on `path` and applies each authenticated
/// "cancel <id>" / "pause <id>" line to the orchestrator. Malformed lines
/// are ignored; unauthenticated connections are dropped.
pub fn spawn_control_listener(
    orchestrator: Orchestrator,
    path: impl AsRef<Path>,
    token: Option<String>,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref().to_path_buf();
    let token = Arc::new(token);
    let handle = tokio::spawn(async move {
        let _ = std::fs::remove_file(&path);
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let listener = match UnixListener::bind(&path) {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(path = %path.display(), "control socket bind: {}", e);
                return;
            }
        };
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let orchestrator = orchestrator.clone();
                    let token = Arc::clone(&token);
                    tokio::spawn(async move {
                        handle_connection(orchestrator, stream, token.as_deref()).await;
                    });
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

async fn handle_connection(
    orchestrator: Orchestrator,
    stream: tokio::net::UnixStream,
    token: Option<&str>,
) {
    let mut reader = BufReader::new(stream).lines();
    let mut authed = token.is_none();

    while let Ok(Some(line)) = reader.next_line().await {
        let line = line.trim();
        if !authed {
            match line.strip_prefix("x-worker-token ") {
                Some(presented) if Some(presented.trim()) == token => {
                    authed = true;
                    continue;
                }
                _ => {
                    tracing::warn!("control socket: rejected unauthenticated connection");
                    return;
                }
            }
        }
        if let Some(id) = line.strip_prefix("cancel ") {
            if let Err(e) = orchestrator.cancel(id.trim()).await {
                tracing::warn!(job_id = id.trim(), "control cancel failed: {}", e);
            }
        } else if let Some(id) = line.strip_prefix("pause ") {
            if let Err(e) = orchestrator.pause(id.trim()).await {
                tracing::warn!(job_id = id.trim(), "control pause failed: {}", e);
            }
        }
    }
}

/// Send one command line to a running `mdm run`. Returns false when no
/// daemon is listening.
pub async fn send_command(
    socket_path: &Path,
    token: Option<&str>,
    command: &str,
    job_id: &str,
) -> Result<bool> {
    if !socket_path.exists() {
        return Ok(false);
    }
    let mut stream = match tokio::net::UnixStream::connect(socket_path).await {
        Ok(stream) => stream,
        // A stale socket file with nobody listening.
        Err(_) => return Ok(false),
    };
    let mut message = String::new();
    if let Some(token) = token {
        message.push_str(&format!("x-worker-token {}\n", token));
    }
    message.push_str(&format!("{} {}\n", command, job_id));
    stream.write_all(message.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(true)
}
