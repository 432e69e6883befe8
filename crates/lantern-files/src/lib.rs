//! # LANTERN Files
//!
//! File-side support for the transfer engine:
//! - Offset-addressed chunk reads with a deterministic chunk-size policy
//! - Preallocated hidden temp files with offset-addressed chunk writes
//! - JSON resume checkpoints that only ever advance
//! - Collision-free inbox placement
//! - Streaming whole-file SHA-256

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod assembler;
pub mod checkpoint;
pub mod chunker;
pub mod hash;
pub mod inbox;

use thiserror::Error;

/// 64 KiB chunks for files under 1 MiB.
pub const CHUNK_SIZE_SMALL: u32 = 64 * 1024;

/// 256 KiB chunks for files under 100 MiB.
pub const CHUNK_SIZE_MEDIUM: u32 = 256 * 1024;

/// 1 MiB chunks for everything larger.
pub const CHUNK_SIZE_LARGE: u32 = 1024 * 1024;

/// Pick the chunk size for a file. The policy is deterministic so both
/// ends of a transfer agree without negotiation:
/// under 1 MiB → 64 KiB, under 100 MiB → 256 KiB, otherwise 1 MiB.
#[must_use]
pub fn chunk_size_for(file_size: u64) -> u32 {
    if file_size < 1024 * 1024 {
        CHUNK_SIZE_SMALL
    } else if file_size < 100 * 1024 * 1024 {
        CHUNK_SIZE_MEDIUM
    } else {
        CHUNK_SIZE_LARGE
    }
}

/// Number of chunks a file splits into.
#[must_use]
pub fn chunk_count(file_size: u64, chunk_size: u32) -> u64 {
    file_size.div_ceil(u64::from(chunk_size))
}

/// Errors from file-side transfer support.
#[derive(Debug, Error)]
pub enum FileError {
    /// Filesystem failure.
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A chunk index or length did not match the transfer geometry.
    #[error("invalid chunk {index}: {reason}")]
    InvalidChunk {
        /// The offending chunk index.
        index: u64,
        /// What was wrong with it.
        reason: String,
    },

    /// A checkpoint record could not be parsed.
    #[error("corrupt checkpoint: {0}")]
    CorruptCheckpoint(#[from] serde_json::Error),
}
