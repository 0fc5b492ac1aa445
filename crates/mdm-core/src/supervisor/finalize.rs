//! Artifact finalization: atomic move from the per-job temp dir into the
//! data dir.
//!
//! Rename is atomic on one volume; across volumes the artifact is copied
//! next to its destination, fsynced, and renamed into place so a crash can
//! never leave a half-written file under the final name.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::adapters::Artifact;

pub fn finalize_artifact(
    job_id: &str,
    artifact: &Artifact,
    temp_dir: &Path,
    data_root: &Path,
) -> Result<Artifact> {
    let dest_dir = data_root.join(job_id);
    fs::create_dir_all(&dest_dir)
        .with_context(|| format!("create output dir: {}", dest_dir.display()))?;
    let dest = dest_dir.join(&artifact.filename);

    // A previous partial finalize of the same attempt may have left the
    // destination; the fresh artifact wins.
    if dest.exists() {
        remove_any(&dest)?;
    }

    match fs::rename(&artifact.path, &dest) {
        Ok(()) => {}
        Err(e) if is_cross_device(&e) => {
            copy_fsync_rename(&artifact.path, &dest_dir, &dest)?;
            remove_any(&artifact.path)?;
        }
        Err(e) => {
            return Err(e).with_context(|| {
                format!(
                    "move {} to {}",
                    artifact.path.display(),
                    dest.display()
                )
            })
        }
    }

    if let Err(e) = fs::remove_dir_all(temp_dir) {
        tracing::debug!("temp dir cleanup failed ({}): {}", temp_dir.display(), e);
    }

    tracing::info!(job_id, path = %dest.display(), "artifact finalized");
    Ok(Artifact {
        filename: artifact.filename.clone(),
        path: dest,
        size: artifact.size,
    })
}

fn is_cross_device(e: &std::io::Error) -> bool {
    #[cfg(unix)]
    {
        e.raw_os_error() == Some(libc::EXDEV)
    }
    #[cfg(not(unix))]
    {
        let _ = e;
        false
    }
}

/// Whether an error chain bottoms out in ENOSPC.
pub fn is_disk_full(e: &anyhow::Error) -> bool {
    #[cfg(unix)]
    {
        e.chain()
            .filter_map(|cause| cause.downcast_ref::<std::io::Error>())
            .any(|io| io.raw_os_error() == Some(libc::ENOSPC))
    }
    #[cfg(not(unix))]
    {
        let _ = e;
        false
    }
}

fn remove_any(path: &Path) -> Result<()> {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.with_context(|| format!("remove {}", path.display()))
}

/// Copy into a staging name beside the destination, fsync, then rename.
fn copy_fsync_rename(src: &Path, dest_dir: &Path, dest: &Path) -> Result<()> {
    let staging = dest_dir.join(format!(
        ".incoming-{}",
        dest.file_name().and_then(|n| n.to_str()).unwrap_or("artifact")
    ));
    if staging.exists() {
        remove_any(&staging)?;
    }
    copy_recursive(src, &staging)?;
    fs::rename(&staging, dest)
        .with_context(|| format!("rename staged copy into {}", dest.display()))?;
    Ok(())
}

fn copy_recursive(src: &Path, dest: &Path) -> Result<()> {
    if src.is_dir() {
        fs::create_dir_all(dest)?;
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &dest.join(entry.file_name()))?;
        }
        Ok(())
    } else {
        fs::copy(src, dest).with_context(|| format!("copy {}", src.display()))?;
        let file = fs::File::open(dest)?;
        file.sync_all().context("fsync staged copy")?;
        Ok(())
    }
}
