//! Streaming whole-file SHA-256.

use crate::FileError;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Read buffer for streaming hashes. Each buffer is awaited separately so
/// large files never monopolize a worker thread.
const HASH_BUF_SIZE: usize = 64 * 1024;

/// Compute SHA-256 over an entire file without loading it into memory.
///
/// # Errors
///
/// Returns [`FileError::Io`] if the file cannot be opened or read.
pub async fn sha256_file(path: impl AsRef<Path>) -> Result<[u8; 32], FileError> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUF_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    Ok(out)
}

/// Compute SHA-256 over a byte slice (chunk hashes).
#[must_use]
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(data));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_file_hash_matches_slice_hash() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..200_000).map(|i| (i % 251) as u8).collect();
        f.write_all(&data).unwrap();
        f.flush().unwrap();

        let from_file = sha256_file(f.path()).await.unwrap();
        assert_eq!(from_file, sha256(&data));
    }

    #[tokio::test]
    async fn test_empty_file() {
        let f = tempfile::NamedTempFile::new().unwrap();
        let digest = sha256_file(f.path()).await.unwrap();
        // SHA-256 of the empty string.
        assert_eq!(
            hex::encode(digest),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
