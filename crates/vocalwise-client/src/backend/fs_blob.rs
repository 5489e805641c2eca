use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tracing::{debug, info};

use super::{BackendError, BlobRef, BlobStore};

/// Resolve `key` below `base`, rejecting anything that would escape it.
fn resolve_key(base: &Path, key: &str) -> Result<PathBuf, BackendError> {
    let mut resolved = base.to_path_buf();
    let mut depth = 0usize;
    for component in Path::new(key).components() {
        match component {
            Component::Normal(c) => {
                resolved.push(c);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(BackendError::Unavailable(format!(
                    "path traversal detected in blob key '{key}'"
                )));
            }
        }
    }
    if depth == 0 {
        return Err(BackendError::Unavailable("empty blob key".to_string()));
    }
    Ok(resolved)
}

/// Blob store on the local filesystem.  URLs are `file://` paths.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    base_path: PathBuf,
    max_size: usize,
}

impl FsBlobStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self, BackendError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            BackendError::Unavailable(format!(
                "Failed to create blob directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        let base_path = base_path.canonicalize().unwrap_or(base_path);
        info!(path = %base_path.display(), "Blob store initialized");

        Ok(Self {
            base_path,
            max_size,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub async fn read(&self, blob: &BlobRef) -> Result<Vec<u8>, BackendError> {
        let path = resolve_key(&self.base_path, &blob.key)?;
        fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => BackendError::NotFound(blob.key.clone()),
            _ => BackendError::Unavailable(format!("Failed to read blob {}: {}", blob.key, e)),
        })
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload(&self, key: &str, bytes: Bytes) -> Result<BlobRef, BackendError> {
        if bytes.is_empty() {
            return Err(BackendError::Unavailable("Empty blob".to_string()));
        }
        if bytes.len() > self.max_size {
            return Err(BackendError::Unavailable(format!(
                "Blob too large: {} bytes (max {})",
                bytes.len(),
                self.max_size
            )));
        }

        let path = resolve_key(&self.base_path, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                BackendError::Unavailable(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        fs::write(&path, &bytes)
            .await
            .map_err(|e| BackendError::Unavailable(format!("Failed to write blob {key}: {e}")))?;

        debug!(key, size = bytes.len(), "Stored blob");
        Ok(BlobRef {
            key: key.to_string(),
            size: bytes.len(),
        })
    }

    async fn download_url(&self, blob: &BlobRef) -> Result<String, BackendError> {
        let path = resolve_key(&self.base_path, &blob.key)?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(BackendError::NotFound(blob.key.clone()));
        }
        Ok(format!("file://{}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store() -> (FsBlobStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path().to_path_buf(), 1024).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn upload_and_read_back() {
        let (store, _dir) = test_store().await;
        let blob = store
            .upload("uploads/1700000000000_talk.mp4", Bytes::from_static(b"frames"))
            .await
            .unwrap();

        assert_eq!(store.read(&blob).await.unwrap(), b"frames");
        let url = store.download_url(&blob).await.unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("uploads/1700000000000_talk.mp4"));
    }

    #[tokio::test]
    async fn traversal_rejected() {
        let (store, _dir) = test_store().await;
        assert!(store
            .upload("../escape.txt", Bytes::from_static(b"x"))
            .await
            .is_err());
        assert!(store
            .upload("/etc/passwd", Bytes::from_static(b"x"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn size_limits_enforced() {
        let (store, _dir) = test_store().await;
        assert!(store.upload("a", Bytes::new()).await.is_err());
        assert!(store.upload("a", Bytes::from(vec![0u8; 2048])).await.is_err());
    }

    #[tokio::test]
    async fn missing_blob_has_no_url() {
        let (store, _dir) = test_store().await;
        let missing = BlobRef {
            key: "uploads/none".into(),
            size: 0,
        };
        assert!(matches!(
            store.download_url(&missing).await,
            Err(BackendError::NotFound(_))
        ));
    }
}
