//! Offset-addressed chunk writes into a preallocated temp file.

use crate::{chunk_count, FileError};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

/// Write side of one incoming transfer.
///
/// Owns the hidden temp file, preallocated to the declared size, plus the
/// per-chunk received map. The transfer engine wraps this in a mutex so
/// position management, the write, the flush, and the counter update are
/// one exclusive critical section.
pub struct FileAssembler {
    file: tokio::fs::File,
    path: PathBuf,
    file_size: u64,
    chunk_size: u32,
    total_chunks: u64,
    received: Vec<bool>,
    received_count: u64,
}

impl FileAssembler {
    /// Create (or reopen) the temp file and preallocate it.
    ///
    /// `last_contiguous` restores the received map when resuming from a
    /// checkpoint: every chunk up to and including it counts as written.
    /// Pass `-1` for a fresh transfer.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::Io`] if the temp file cannot be created or
    /// sized.
    pub async fn create(
        path: impl AsRef<Path>,
        file_size: u64,
        chunk_size: u32,
        last_contiguous: i64,
    ) -> Result<Self, FileError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await?;
        file.set_len(file_size).await?;

        let total_chunks = chunk_count(file_size, chunk_size);
        let mut received = vec![false; total_chunks as usize];
        let mut received_count = 0;
        if last_contiguous >= 0 {
            let upto = (last_contiguous as u64 + 1).min(total_chunks);
            for flag in received.iter_mut().take(upto as usize) {
                *flag = true;
            }
            received_count = upto;
        }

        Ok(Self {
            file,
            path,
            file_size,
            chunk_size,
            total_chunks,
            received,
            received_count,
        })
    }

    /// Total number of chunks in the transfer.
    #[must_use]
    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    /// Chunks durably written so far.
    #[must_use]
    pub fn received_count(&self) -> u64 {
        self.received_count
    }

    /// Bytes durably written so far (approximate for the short final chunk).
    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        (self.received_count * u64::from(self.chunk_size)).min(self.file_size)
    }

    /// Whether every chunk has been written.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.received_count == self.total_chunks
    }

    /// Whether a particular chunk has been written.
    #[must_use]
    pub fn has_chunk(&self, index: u64) -> bool {
        self.received
            .get(index as usize)
            .copied()
            .unwrap_or(false)
    }

    /// Highest index such that every chunk at or below it is written,
    /// or `-1` if chunk 0 is still missing.
    #[must_use]
    pub fn contiguous_frontier(&self) -> i64 {
        let mut frontier: i64 = -1;
        for (i, done) in self.received.iter().enumerate() {
            if !done {
                break;
            }
            frontier = i as i64;
        }
        frontier
    }

    /// Write one chunk at its offset, flush, and mark it received.
    ///
    /// Duplicate writes of an already received chunk are accepted and do
    /// not advance the counter.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::InvalidChunk`] for an out-of-range index or a
    /// length that does not match the transfer geometry, [`FileError::Io`]
    /// on write failure.
    pub async fn write_chunk(&mut self, index: u64, data: &[u8]) -> Result<(), FileError> {
        if index >= self.total_chunks {
            return Err(FileError::InvalidChunk {
                index,
                reason: format!("index out of range (total {})", self.total_chunks),
            });
        }
        let offset = index * u64::from(self.chunk_size);
        let expected = u64::from(self.chunk_size).min(self.file_size - offset) as usize;
        if data.len() != expected {
            return Err(FileError::InvalidChunk {
                index,
                reason: format!("expected {expected} bytes, got {}", data.len()),
            });
        }

        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.write_all(data).await?;
        self.file.sync_data().await?;

        if !self.received[index as usize] {
            self.received[index as usize] = true;
            self.received_count += 1;
        }
        Ok(())
    }

    /// Sync everything and close the file, returning the temp path for
    /// verification and placement.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::Io`] if the final sync fails.
    pub async fn close(self) -> Result<PathBuf, FileError> {
        self.file.sync_all().await?;
        Ok(self.path)
    }

    /// The temp file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offset_writes_any_order() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = dir.path().join(".t1.tmp");
        let mut asm = FileAssembler::create(&tmp, 2500, 1024, -1).await.unwrap();
        assert_eq!(asm.total_chunks(), 3);

        asm.write_chunk(2, &vec![3u8; 452]).await.unwrap();
        asm.write_chunk(0, &vec![1u8; 1024]).await.unwrap();
        asm.write_chunk(1, &vec![2u8; 1024]).await.unwrap();
        assert!(asm.is_complete());

        let path = asm.close().await.unwrap();
        let contents = tokio::fs::read(&path).await.unwrap();
        assert_eq!(contents.len(), 2500);
        assert_eq!(contents[0], 1);
        assert_eq!(contents[1024], 2);
        assert_eq!(contents[2048], 3);
    }

    #[tokio::test]
    async fn test_preallocated_to_declared_size() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = dir.path().join(".t2.tmp");
        let asm = FileAssembler::create(&tmp, 10_000, 1024, -1).await.unwrap();
        let len = tokio::fs::metadata(asm.path()).await.unwrap().len();
        assert_eq!(len, 10_000);
    }

    #[tokio::test]
    async fn test_contiguous_frontier() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = dir.path().join(".t3.tmp");
        let mut asm = FileAssembler::create(&tmp, 4096, 1024, -1).await.unwrap();

        assert_eq!(asm.contiguous_frontier(), -1);
        asm.write_chunk(0, &[0u8; 1024]).await.unwrap();
        assert_eq!(asm.contiguous_frontier(), 0);
        asm.write_chunk(2, &[2u8; 1024]).await.unwrap();
        assert_eq!(asm.contiguous_frontier(), 0);
        asm.write_chunk(1, &[1u8; 1024]).await.unwrap();
        assert_eq!(asm.contiguous_frontier(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_chunk_not_double_counted() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = dir.path().join(".t4.tmp");
        let mut asm = FileAssembler::create(&tmp, 2048, 1024, -1).await.unwrap();

        asm.write_chunk(0, &[0u8; 1024]).await.unwrap();
        asm.write_chunk(0, &[9u8; 1024]).await.unwrap();
        assert_eq!(asm.received_count(), 1);
        assert!(!asm.is_complete());
    }

    #[tokio::test]
    async fn test_resume_restores_received_map() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = dir.path().join(".t5.tmp");
        let asm = FileAssembler::create(&tmp, 10 * 1024, 1024, 4).await.unwrap();
        assert_eq!(asm.received_count(), 5);
        assert_eq!(asm.contiguous_frontier(), 4);
        assert!(asm.has_chunk(4));
        assert!(!asm.has_chunk(5));
    }

    #[tokio::test]
    async fn test_bad_chunk_length_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = dir.path().join(".t6.tmp");
        let mut asm = FileAssembler::create(&tmp, 2048, 1024, -1).await.unwrap();
        assert!(matches!(
            asm.write_chunk(0, &[0u8; 100]).await,
            Err(FileError::InvalidChunk { .. })
        ));
        assert!(matches!(
            asm.write_chunk(9, &[0u8; 1024]).await,
            Err(FileError::InvalidChunk { .. })
        ));
    }
}
