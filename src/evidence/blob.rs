//! Content-addressed blob storage for evidence files.
//!
//! Blobs live in a two-level fan-out tree derived from the evidence id:
//! `{base}/{id[0:2]}/{id[2:4]}/{id}`. Files are written once and read many
//! times; a second write for the same id is refused so a stored hash can
//! never silently change. Deletion is rare and audited by the caller.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Errors raised by the blob store.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    /// A blob for this id already exists; content is write-once.
    #[error("blob already exists: {0}")]
    AlreadyExists(String),
    /// No blob stored for this id.
    #[error("blob not found: {0}")]
    NotFound(String),
    /// Filesystem failure.
    #[error("blob io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of storing a blob.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    /// Opaque storage location handed to the catalogue.
    pub location: String,
    /// Hex SHA-256 of the stored bytes.
    pub sha256: String,
    /// Size of the stored bytes.
    pub size_bytes: u64,
}

/// Write-once filesystem blob store.
#[derive(Debug, Clone)]
pub struct BlobStore {
    base: PathBuf,
}

impl BlobStore {
    /// Create a store rooted at the given directory.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Create a store from the `EVIDENCE_BLOB_ROOT` environment variable,
    /// defaulting to `./evidence-blobs`.
    pub fn from_env() -> Self {
        let base = std::env::var("EVIDENCE_BLOB_ROOT")
            .unwrap_or_else(|_| "./evidence-blobs".to_string());
        Self::new(base)
    }

    /// The fan-out path for an id.
    fn path_for(&self, id: &str) -> PathBuf {
        let prefix = &id[..id.len().min(2)];
        let middle = if id.len() >= 4 { &id[2..4] } else { "__" };
        self.base.join(prefix).join(middle).join(id)
    }

    /// Compute the SHA-256 of a byte slice, hex-encoded.
    pub fn sha256_hex(content: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content);
        hex::encode(hasher.finalize())
    }

    /// Store a blob. Fails with `AlreadyExists` when the id is taken.
    pub async fn write(&self, id: &str, content: &[u8]) -> Result<StoredBlob, BlobError> {
        let path = self.path_for(id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(BlobError::AlreadyExists(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        file.write_all(content).await?;
        file.sync_all().await?;

        Ok(StoredBlob {
            location: path.to_string_lossy().into_owned(),
            sha256: Self::sha256_hex(content),
            size_bytes: content.len() as u64,
        })
    }

    /// Open a blob for streaming reads.
    pub async fn open(&self, id: &str) -> Result<tokio::fs::File, BlobError> {
        let path = self.path_for(id);
        match tokio::fs::File::open(&path).await {
            Ok(f) => Ok(f),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Read a blob fully into memory.
    pub async fn read(&self, id: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.path_for(id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a blob. Missing blobs are not an error.
    pub async fn remove(&self, id: &str) -> Result<(), BlobError> {
        let path = self.path_for(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// The root directory of this store.
    pub fn base(&self) -> &Path {
        &self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_store() -> BlobStore {
        let dir = std::env::temp_dir().join(format!("blob-store-{}", Uuid::new_v4()));
        BlobStore::new(dir)
    }

    #[tokio::test]
    async fn test_write_read_round_trip() {
        let store = temp_store();
        let id = Uuid::new_v4().to_string();

        let stored = store.write(&id, b"disk image bytes").await.unwrap();
        assert_eq!(stored.size_bytes, 16);
        assert_eq!(stored.sha256, BlobStore::sha256_hex(b"disk image bytes"));

        let bytes = store.read(&id).await.unwrap();
        assert_eq!(bytes, b"disk image bytes");
    }

    #[tokio::test]
    async fn test_write_is_write_once() {
        let store = temp_store();
        let id = Uuid::new_v4().to_string();

        store.write(&id, b"first").await.unwrap();
        let err = store.write(&id, b"second").await.unwrap_err();
        assert!(matches!(err, BlobError::AlreadyExists(_)));

        // Original content untouched.
        assert_eq!(store.read(&id).await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_fanout_layout() {
        let store = temp_store();
        let id = "abcdef00-0000-0000-0000-000000000000";
        store.write(id, b"x").await.unwrap();

        let expected = store.base().join("ab").join("cd").join(id);
        assert!(expected.exists());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let store = temp_store();
        let id = Uuid::new_v4().to_string();
        store.write(&id, b"x").await.unwrap();

        store.remove(&id).await.unwrap();
        store.remove(&id).await.unwrap();
        assert!(matches!(
            store.read(&id).await.unwrap_err(),
            BlobError::NotFound(_)
        ));
    }
}
