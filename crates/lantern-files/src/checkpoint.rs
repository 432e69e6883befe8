//! Resume checkpoints.
//!
//! A checkpoint records the last contiguously written chunk of an incoming
//! transfer. It lives next to the temp file as
//! `<inbox>/.<transfer_id>.checkpoint`, serialized as JSON so future fields
//! can be added without breaking old readers. A checkpoint only ever
//! advances; an attempt to save a smaller index is ignored.

use crate::FileError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

/// Persisted resume record for one incoming transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// The transfer this checkpoint belongs to.
    pub transfer_id: String,
    /// Last chunk index below which every chunk is durably written.
    pub last_chunk: i64,
    /// ISO-8601 time of the last update.
    pub timestamp: String,
}

/// Path of the checkpoint record for a transfer.
#[must_use]
pub fn checkpoint_path(inbox: &Path, transfer_id: &str) -> PathBuf {
    inbox.join(format!(".{transfer_id}.checkpoint"))
}

/// Persist a checkpoint, never rewinding an existing one.
///
/// The record is flushed and synced before returning, so a positive ack
/// sent afterwards is covered by it.
///
/// # Errors
///
/// Returns [`FileError::Io`] on write failure; a corrupt existing record is
/// overwritten rather than trusted.
pub async fn save(inbox: &Path, transfer_id: &str, last_chunk: i64) -> Result<(), FileError> {
    if let Ok(Some(existing)) = load(inbox, transfer_id).await {
        if existing.last_chunk >= last_chunk {
            return Ok(());
        }
    }

    let checkpoint = Checkpoint {
        transfer_id: transfer_id.to_string(),
        last_chunk,
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    let json = serde_json::to_vec(&checkpoint)?;

    let path = checkpoint_path(inbox, transfer_id);
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)
        .await?;
    file.write_all(&json).await?;
    file.sync_data().await?;
    tracing::trace!("checkpoint for {transfer_id} advanced to {last_chunk}");
    Ok(())
}

/// Load the checkpoint for a transfer, if one exists.
///
/// # Errors
///
/// Returns [`FileError::CorruptCheckpoint`] if the record exists but does
/// not parse, [`FileError::Io`] on other read failures.
pub async fn load(inbox: &Path, transfer_id: &str) -> Result<Option<Checkpoint>, FileError> {
    let path = checkpoint_path(inbox, transfer_id);
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Remove the checkpoint for a transfer. Missing records are not an error.
///
/// # Errors
///
/// Returns [`FileError::Io`] on filesystem failure other than absence.
pub async fn remove(inbox: &Path, transfer_id: &str) -> Result<(), FileError> {
    let path = checkpoint_path(inbox, transfer_id);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
