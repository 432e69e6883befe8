//! Offset-addressed chunk reads from a source file.

use crate::{chunk_count, FileError};
use std::io::SeekFrom;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Reads fixed-size chunks of a source file by index.
///
/// Holds the file open for the lifetime of the transfer; each read seeks,
/// so chunks can be re-read in any order (negative acks resend single
/// chunks out of sequence).
pub struct FileChunker {
    file: File,
    file_size: u64,
    chunk_size: u32,
    total_chunks: u64,
}

impl FileChunker {
    /// Open a source file for chunked reading.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::Io`] if the file cannot be opened or its
    /// metadata read.
    pub async fn open(path: impl AsRef<Path>, chunk_size: u32) -> Result<Self, FileError> {
        let file = File::open(path).await?;
        let file_size = file.metadata().await?.len();
        Ok(Self {
            file,
            file_size,
            chunk_size,
            total_chunks: chunk_count(file_size, chunk_size),
        })
    }

    /// Source file size in bytes.
    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Chunk size in bytes.
    #[must_use]
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Total number of chunks.
    #[must_use]
    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    /// Read the chunk at `index`. The final chunk may be short.
    ///
    /// # Errors
    ///
    /// Returns [`FileError::InvalidChunk`] for an out-of-range index and
    /// [`FileError::Io`] on read failure.
    pub async fn read_chunk(&mut self, index: u64) -> Result<Vec<u8>, FileError> {
        if index >= self.total_chunks {
            return Err(FileError::InvalidChunk {
                index,
                reason: format!("index out of range (total {})", self.total_chunks),
            });
        }
        let offset = index * u64::from(self.chunk_size);
        let len = u64::from(self.chunk_size).min(self.file_size - offset) as usize;

        self.file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len];
        self.file.read_exact(&mut buf).await?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn fixture(len: usize) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..len).map(|i| (i % 256) as u8).collect();
        f.write_all(&data).unwrap();
        f.flush().unwrap();
        f
    }

    #[tokio::test]
    async fn test_read_chunks_in_order() {
        let f = fixture(2500);
        let mut chunker = FileChunker::open(f.path(), 1024).await.unwrap();
        assert_eq!(chunker.total_chunks(), 3);
        assert_eq!(chunker.file_size(), 2500);

        let c0 = chunker.read_chunk(0).await.unwrap();
        let c1 = chunker.read_chunk(1).await.unwrap();
        let c2 = chunker.read_chunk(2).await.unwrap();
        assert_eq!(c0.len(), 1024);
        assert_eq!(c1.len(), 1024);
        assert_eq!(c2.len(), 452);
        assert_eq!(c0[0], 0);
        assert_eq!(c1[0], 0); // 1024 % 256 == 0
        assert_eq!(c2[1], (2049 % 256) as u8);
    }

    #[tokio::test]
    async fn test_reread_out_of_order() {
        let f = fixture(4096);
        let mut chunker = FileChunker::open(f.path(), 1024).await.unwrap();

        let c3 = chunker.read_chunk(3).await.unwrap();
        let c0 = chunker.read_chunk(0).await.unwrap();
        let c3_again = chunker.read_chunk(3).await.unwrap();
        assert_eq!(c3, c3_again);
        assert_ne!(c0, c3);
    }

    #[tokio::test]
    async fn test_out_of_range_rejected() {
        let f = fixture(100);
        let mut chunker = FileChunker::open(f.path(), 1024).await.unwrap();
        assert_eq!(chunker.total_chunks(), 1);
        assert!(matches!(
            chunker.read_chunk(1).await,
            Err(FileError::InvalidChunk { index: 1, .. })
        ));
    }
}
