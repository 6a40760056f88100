use crate::traits::{ByteStream, ObjectInfo, Storage, StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use courier_core::StorageBackend;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

/// Local filesystem storage implementation
#[derive(Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    /// Create a new LocalStorage instance
    ///
    /// # Arguments
    /// * `base_path` - Root directory for object storage (e.g., "/var/lib/courier/transfers")
    pub async fn new(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalStorage { base_path })
    }

    /// Convert storage key to filesystem path with security validation
    ///
    /// Rejects keys with path traversal sequences that could escape the base
    /// storage directory.
    fn key_to_path(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() || key.contains("..") || key.starts_with('/') {
            return Err(StorageError::InvalidKey(
                "Storage key contains invalid characters".to_string(),
            ));
        }

        Ok(self.base_path.join(key))
    }

    /// Ensure parent directory exists
    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    fn map_io(key: &str, err: std::io::Error) -> StorageError {
        if err.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(key.to_string())
        } else {
            StorageError::IoError(err)
        }
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let path = self.key_to_path(key)?;
        self.ensure_parent_dir(&path).await?;
        fs::write(&path, &data)
            .await
            .map_err(|e| StorageError::WriteFailed(format!("{}: {}", key, e)))?;
        tracing::debug!(key = %key, size_bytes = data.len(), "local put");
        Ok(())
    }

    async fn put_stream(
        &self,
        key: &str,
        mut reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
    ) -> StorageResult<u64> {
        let path = self.key_to_path(key)?;
        self.ensure_parent_dir(&path).await?;

        let mut file = fs::File::create(&path)
            .await
            .map_err(|e| StorageError::WriteFailed(format!("{}: {}", key, e)))?;
        let written = tokio::io::copy(&mut reader, &mut file)
            .await
            .map_err(|e| StorageError::WriteFailed(format!("{}: {}", key, e)))?;
        tokio::io::AsyncWriteExt::flush(&mut file)
            .await
            .map_err(|e| StorageError::WriteFailed(format!("{}: {}", key, e)))?;

        tracing::debug!(key = %key, size_bytes = written, "local put_stream");
        Ok(written)
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.key_to_path(key)?;
        let data = fs::read(&path).await.map_err(|e| Self::map_io(key, e))?;
        Ok(Bytes::from(data))
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        let path = self.key_to_path(key)?;
        let file = fs::File::open(&path).await.map_err(|e| Self::map_io(key, e))?;
        let stream = ReaderStream::new(file).map(|res| res.map_err(StorageError::IoError));
        Ok(Box::pin(stream))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_to_path(key)?;
        fs::remove_file(&path).await.map_err(|e| Self::map_io(key, e))?;
        Ok(())
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectInfo> {
        let path = self.key_to_path(key)?;
        let metadata = fs::metadata(&path).await.map_err(|e| Self::map_io(key, e))?;
        if !metadata.is_file() {
            return Err(StorageError::NotFound(key.to_string()));
        }
        Ok(ObjectInfo {
            size: metadata.len(),
            etag: None,
        })
    }

    async fn presigned_get_url(
        &self,
        _key: &str,
        _expires_in: Duration,
    ) -> StorageResult<Option<String>> {
        // The filesystem cannot mint self-authorizing URLs; reads are relayed.
        Ok(None)
    }

    async fn presigned_put_url(
        &self,
        _key: &str,
        _expires_in: Duration,
    ) -> StorageResult<Option<String>> {
        Ok(None)
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}
