//! Sequential append writer for chunked uploads.

use crate::error::Result;
use std::path::PathBuf;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Append-only writer for a single upload
///
/// Chunks are written in call order with no seeking; the caller is
/// responsible for serializing calls for the same upload.
#[derive(Debug)]
pub struct UploadWriter {
    path: PathBuf,
    file: File,
    bytes_written: u64,
}

impl UploadWriter {
    /// Create (or truncate) `path` and open it for appending
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub async fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .await?;

        tracing::trace!("Created upload file {}", path.display());

        Ok(Self {
            path,
            file,
            bytes_written: 0,
        })
    }

    /// Append a chunk, returning the total number of bytes written so far
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails. The byte counter is only advanced
    /// once the whole chunk has reached the file.
    pub async fn append(&mut self, chunk: &[u8]) -> Result<u64> {
        self.file.write_all(chunk).await?;
        // tokio completes `write_all` before the blocking write runs
        self.file.flush().await?;
        self.bytes_written += chunk.len() as u64;
        Ok(self.bytes_written)
    }

    /// Flush, sync and close the file, returning its final size
    ///
    /// # Errors
    ///
    /// Returns an error if flushing or syncing fails.
    pub async fn finish(mut self) -> Result<u64> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(self.bytes_written)
    }

    /// Close the file and delete whatever was written
    ///
    /// # Errors
    ///
    /// Returns an error if the partial file cannot be removed.
    pub async fn discard(self) -> Result<()> {
        let Self { path, file, .. } = self;
        drop(file);

        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
