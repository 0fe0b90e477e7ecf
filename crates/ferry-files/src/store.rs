//! Upload directory layout.

use crate::error::{Result, StoreError};
use std::path::PathBuf;

/// Upload store
///
/// Owns the directory that completed transfers land in. Every transfer is
/// stored as a single file named `{transfer_id}-{file_name}` directly under
/// the root, and is published under `{public_prefix}/{transfer_id}-{file_name}`.
#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
    public_prefix: String,
}

impl UploadStore {
    /// Create a store rooted at `root` without touching the filesystem
    pub fn new(root: impl Into<PathBuf>, public_prefix: impl Into<String>) -> Self {
        let public_prefix = public_prefix.into();
        Self {
            root: root.into(),
            public_prefix: public_prefix.trim_end_matches('/').to_string(),
        }
    }

    /// Create a store, making sure the root directory exists
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory cannot be created.
    pub async fn open(root: impl Into<PathBuf>, public_prefix: impl Into<String>) -> Result<Self> {
        let store = Self::new(root, public_prefix);
        tokio::fs::create_dir_all(&store.root).await?;
        Ok(store)
    }

    /// Prefix that download paths are published under, without a trailing slash
    #[must_use]
    pub fn public_prefix(&self) -> &str {
        &self.public_prefix
    }

    /// Destination path on disk for a transfer
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidFileName`] if either component could
    /// escape the upload directory.
    pub fn destination_path(&self, transfer_id: &str, file_name: &str) -> Result<PathBuf> {
        validate_component(transfer_id)?;
        validate_component(file_name)?;
        Ok(self.root.join(format!("{transfer_id}-{file_name}")))
    }

    /// Path on disk of a stored file, by the name its download path ends in
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidFileName`] if `stored_name` is not a
    /// single plain path component.
    pub fn stored_path(&self, stored_name: &str) -> Result<PathBuf> {
        validate_component(stored_name)?;
        Ok(self.root.join(stored_name))
    }

    /// Public download path for a transfer
    ///
    /// Pure string derivation; callers only publish it for names that already
    /// passed [`UploadStore::destination_path`].
    #[must_use]
    pub fn download_path(&self, transfer_id: &str, file_name: &str) -> String {
        format!("{}/{transfer_id}-{file_name}", self.public_prefix)
    }
}

fn validate_component(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);

    if invalid {
        return Err(StoreError::InvalidFileName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_destination_layout() {
        let store = UploadStore::new("/srv/uploads", "/uploads");
        let path = store.destination_path("t1", "doc.pdf").unwrap();
        assert_eq!(path, PathBuf::from("/srv/uploads/t1-doc.pdf"));
    }

    #[test]
    fn test_download_path() {
        let store = UploadStore::new("/srv/uploads", "/uploads/");
        assert_eq!(store.download_path("t1", "doc.pdf"), "/uploads/t1-doc.pdf");
    }

    #[test]
    fn test_rejects_traversal() {
        let store = UploadStore::new("/srv/uploads", "/uploads");
        assert!(matches!(
            store.destination_path("t1", "../etc/passwd"),
            Err(StoreError::InvalidFileName(_))
        ));
        assert!(store.destination_path("t1", "..").is_err());
        assert!(store.destination_path("a/b", "doc.pdf").is_err());
        assert!(store.destination_path("t1", "").is_err());
        assert!(store.destination_path("t1", "x\\y").is_err());
    }

    #[test]
    fn test_allows_dots_inside_names() {
        let store = UploadStore::new("/srv/uploads", "/uploads");
        assert!(store.destination_path("t1", "archive.tar.gz").is_ok());
        assert!(store.destination_path("t1", "..hidden").is_ok());
    }

    #[tokio::test]
    async fn test_open_creates_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("nested/uploads");
        let store = UploadStore::open(&root, "/uploads").await.unwrap();
        assert!(root.is_dir());
        assert_eq!(store.public_prefix(), "/uploads");
    }

    #[test]
    fn test_stored_path_matches_download_name() {
        let store = UploadStore::new("/srv/uploads", "/uploads");
        let published = store.download_path("t1", "doc.pdf");
        let name = published.strip_prefix("/uploads/").unwrap();
        assert_eq!(
            store.stored_path(name).unwrap(),
            store.destination_path("t1", "doc.pdf").unwrap()
        );
    }

    #[test]
    fn test_stored_path_rejects_traversal() {
        let store = UploadStore::new("/srv/uploads", "/uploads");
        assert!(store.stored_path("..").is_err());
        assert!(store.stored_path("../secret").is_err());
        assert!(store.stored_path("a\\b").is_err());
        assert!(store.stored_path("").is_err());
    }
}
