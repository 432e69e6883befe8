//! Inbox placement.
//!
//! Completed downloads move from their hidden temp path to the inbox under
//! the announced name. A name collision picks the smallest `k ≥ 1` such
//! that `name (k).ext` is free. Partial files never appear under a final
//! name.

use crate::FileError;
use std::path::{Path, PathBuf};

/// Fallback name for announces whose file name reduces to nothing.
const FALLBACK_NAME: &str = "download";

/// Path of the hidden temp file for an in-progress transfer.
#[must_use]
pub fn temp_path(inbox: &Path, transfer_id: &str) -> PathBuf {
    inbox.join(format!(".{transfer_id}.tmp"))
}

/// Ensure the inbox directory exists under the data root.
///
/// # Errors
///
/// Returns [`FileError::Io`] if the directory cannot be created.
pub async fn ensure_inbox(data_root: &Path) -> Result<PathBuf, FileError> {
    let inbox = data_root.join("inbox");
    tokio::fs::create_dir_all(&inbox).await?;
    Ok(inbox)
}

/// Reduce an announced file name to a safe single component.
///
/// Remote peers declare names free-form; anything resembling a path is cut
/// down to its final component so an announce can never escape the inbox.
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned = name.replace('\\', "/");
    let component = cleaned
        .rsplit('/')
        .find(|part| !part.is_empty() && *part != "." && *part != "..")
        .unwrap_or(FALLBACK_NAME);
    if component.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        component.to_string()
    }
}

/// Find the destination path for a file name, appending ` (k)` before the
/// extension for the smallest `k` that avoids a collision.
///
/// # Errors
///
/// Returns [`FileError::Io`] if existence checks fail.
pub async fn unique_destination(inbox: &Path, file_name: &str) -> Result<PathBuf, FileError> {
    let name = sanitize_file_name(file_name);
    let candidate = inbox.join(&name);
    if !tokio::fs::try_exists(&candidate).await? {
        return Ok(candidate);
    }

    let path = Path::new(&name);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(FALLBACK_NAME);
    let ext = path.extension().and_then(|e| e.to_str());

    for k in 1u32.. {
        let next = match ext {
            Some(ext) => format!("{stem} ({k}).{ext}"),
            None => format!("{stem} ({k})"),
        };
        let candidate = inbox.join(next);
        if !tokio::fs::try_exists(&candidate).await? {
            return Ok(candidate);
        }
    }
    unreachable!("u32 collision counter exhausted")
}

/// Move a verified temp file to its final inbox name.
///
/// # Errors
///
/// Returns [`FileError::Io`] if the rename fails.
pub async fn place(temp: &Path, inbox: &Path, file_name: &str) -> Result<PathBuf, FileError> {
    let destination = unique_destination(inbox, file_name).await?;
    tokio::fs::rename(temp, &destination).await?;
    Ok(destination)
}
