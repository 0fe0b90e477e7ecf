//! Transfer session state machine for chunked uploads.
//!
//! ```text
//! Created --open--> Writing --complete/abandon--> Completed
//! ```
//!
//! A session accepts chunks only while `Writing`. Chunks are appended in the
//! order they are handed in; the sender-side offset is recorded for
//! diagnostics but never used to seek, so callers must serialize appends for
//! a given session.

use crate::error::{RelayError, Result};
use crate::types::TransferId;
use ferry_files::{UploadStore, UploadWriter};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Transfer session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    /// Session accepted, destination not created yet
    Created,
    /// Destination open, accepting chunks
    Writing,
    /// Closed; no further chunks accepted
    Completed,
}

/// Server-side state of one in-progress upload
#[derive(Debug)]
pub struct TransferSession {
    transfer_id: TransferId,
    file_name: String,
    expected_size: u64,
    destination: PathBuf,
    download_path: String,

    state: TransferState,
    writer: Option<UploadWriter>,
    bytes_written: u64,

    started_at: Instant,
    last_activity: Instant,
}

impl TransferSession {
    /// Create a session in the `Created` state
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::StorageWrite`] if the transfer id or file name
    /// cannot be mapped to a destination inside the store.
    pub fn new(
        store: &UploadStore,
        transfer_id: impl Into<TransferId>,
        file_name: impl Into<String>,
        expected_size: u64,
    ) -> Result<Self> {
        let transfer_id = transfer_id.into();
        let file_name = file_name.into();
        let destination = store.destination_path(&transfer_id, &file_name)?;
        let download_path = store.download_path(&transfer_id, &file_name);
        let now = Instant::now();

        Ok(Self {
            transfer_id,
            file_name,
            expected_size,
            destination,
            download_path,
            state: TransferState::Created,
            writer: None,
            bytes_written: 0,
            started_at: now,
            last_activity: now,
        })
    }

    /// Create the empty destination file and move to `Writing`
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidState`] unless the session is `Created`,
    /// or [`RelayError::StorageWrite`] if the file cannot be created.
    pub async fn open(&mut self) -> Result<()> {
        if self.state != TransferState::Created {
            return Err(self.invalid("open"));
        }

        let writer = UploadWriter::create(&self.destination).await?;
        self.writer = Some(writer);
        self.state = TransferState::Writing;
        self.touch();
        Ok(())
    }

    /// Append a chunk, returning the running byte count
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnknownTransfer`] once the session is completed,
    /// [`RelayError::InvalidState`] before it is opened, or
    /// [`RelayError::StorageWrite`] if the write fails.
    pub async fn append_chunk(&mut self, payload: &[u8], offset: u64) -> Result<u64> {
        match self.state {
            TransferState::Writing => {}
            TransferState::Completed => {
                return Err(RelayError::UnknownTransfer(self.transfer_id.clone()));
            }
            TransferState::Created => return Err(self.invalid("append")),
        }

        if offset != self.bytes_written {
            tracing::debug!(
                "Transfer {}: chunk offset {} differs from {} bytes written",
                self.transfer_id,
                offset,
                self.bytes_written
            );
        }

        let Some(writer) = self.writer.as_mut() else {
            return Err(self.invalid("append"));
        };
        self.bytes_written = writer.append(payload).await?;
        self.touch();
        Ok(self.bytes_written)
    }

    /// Flush and close the destination, moving to `Completed`
    ///
    /// The session is `Completed` afterwards even if flushing fails.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnknownTransfer`] if already completed, or
    /// [`RelayError::StorageWrite`] if flushing fails.
    pub async fn complete(&mut self) -> Result<u64> {
        if self.state == TransferState::Completed {
            return Err(RelayError::UnknownTransfer(self.transfer_id.clone()));
        }

        self.state = TransferState::Completed;
        match self.writer.take() {
            Some(writer) => Ok(writer.finish().await?),
            None => Ok(self.bytes_written),
        }
    }

    /// Close the destination and delete the partial file
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::StorageWrite`] if the partial file cannot be removed.
    pub async fn abandon(&mut self) -> Result<()> {
        self.state = TransferState::Completed;
        if let Some(writer) = self.writer.take() {
            writer.discard().await?;
        }
        Ok(())
    }

    /// Whether the session has seen no activity for at least `timeout`
    #[must_use]
    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.last_activity.elapsed() >= timeout
    }

    /// Transfer id
    #[must_use]
    pub fn transfer_id(&self) -> &str {
        &self.transfer_id
    }

    /// File name chosen at start
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Announced size
    #[must_use]
    pub fn expected_size(&self) -> u64 {
        self.expected_size
    }

    /// Destination on disk
    #[must_use]
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Public download path
    #[must_use]
    pub fn download_path(&self) -> &str {
        &self.download_path
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Bytes appended so far
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Progress against the announced size (0.0 to 1.0, unclamped above)
    #[must_use]
    pub fn progress(&self) -> f64 {
        if self.expected_size == 0 {
            return 1.0;
        }
        self.bytes_written as f64 / self.expected_size as f64
    }

    /// Time since the session was created
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    fn invalid(&self, operation: &'static str) -> RelayError {
        RelayError::InvalidState {
            transfer_id: self.transfer_id.clone(),
            state: self.state,
            operation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store() -> (TempDir, UploadStore) {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::open(dir.path(), "/uploads").await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let (_dir, store) = store().await;
        let mut session =
            TransferSession::new(&store, "t1", "doc.pdf", 10).unwrap();
        assert_eq!(session.state(), TransferState::Created);
        assert_eq!(session.download_path(), "/uploads/t1-doc.pdf");

        session.open().await.unwrap();
        assert_eq!(session.state(), TransferState::Writing);
        assert!(session.destination().exists());

        assert_eq!(session.append_chunk(b"01234", 0).await.unwrap(), 5);
        assert_eq!(session.append_chunk(b"56789", 5).await.unwrap(), 10);
        assert!((session.progress() - 1.0).abs() < f64::EPSILON);

        assert_eq!(session.complete().await.unwrap(), 10);
        assert_eq!(session.state(), TransferState::Completed);
        assert_eq!(std::fs::read(session.destination()).unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn test_offset_is_not_used_to_seek() {
        let (_dir, store) = store().await;
        let mut session =
            TransferSession::new(&store, "t1", "a.bin", 0).unwrap();
        session.open().await.unwrap();

        session.append_chunk(b"abc", 100).await.unwrap();
        session.append_chunk(b"def", 0).await.unwrap();
        session.complete().await.unwrap();

        assert_eq!(std::fs::read(session.destination()).unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn test_append_before_open() {
        let (_dir, store) = store().await;
        let mut session =
            TransferSession::new(&store, "t1", "a.bin", 0).unwrap();

        let err = session.append_chunk(b"x", 0).await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidState { operation: "append", .. }));
    }

    #[tokio::test]
    async fn test_no_chunks_after_completion() {
        let (_dir, store) = store().await;
        let mut session =
            TransferSession::new(&store, "t1", "a.bin", 0).unwrap();
        session.open().await.unwrap();
        session.complete().await.unwrap();

        let err = session.append_chunk(b"late", 0).await.unwrap_err();
        assert!(matches!(err, RelayError::UnknownTransfer(id) if id == "t1"));
        assert!(session.complete().await.is_err());
        assert_eq!(session.bytes_written(), 0);
    }

    #[tokio::test]
    async fn test_abandon_removes_partial_file() {
        let (_dir, store) = store().await;
        let mut session =
            TransferSession::new(&store, "t1", "a.bin", 100).unwrap();
        session.open().await.unwrap();
        session.append_chunk(b"partial", 0).await.unwrap();

        session.abandon().await.unwrap();
        assert_eq!(session.state(), TransferState::Completed);
        assert!(!session.destination().exists());
    }

    #[tokio::test]
    async fn test_invalid_name_rejected() {
        let (_dir, store) = store().await;
        let result = TransferSession::new(&store, "t1", "../escape", 0);
        assert!(matches!(result, Err(RelayError::StorageWrite(_))));
    }

    #[tokio::test]
    async fn test_idle_detection() {
        let (_dir, store) = store().await;
        let session =
            TransferSession::new(&store, "t1", "a.bin", 0).unwrap();

        assert!(session.is_idle(Duration::ZERO));
        assert!(!session.is_idle(Duration::from_secs(3600)));
    }
}
