//! Storage abstraction trait
//!
//! This module defines the Storage trait that all storage backends must implement.

use async_trait::async_trait;
use bytes::Bytes;
use courier_core::StorageBackend;
use futures::Stream;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Chunked byte stream returned by `Storage::get_stream`.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// Size and optional content hash of a stored object, as reported by the
/// backend. The hash is whatever the backend natively exposes (S3 etag,
/// content digest); it is recorded on write confirmation, not recomputed.
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    pub size: u64,
    pub etag: Option<String>,
}

/// Storage abstraction trait
///
/// All storage backends (S3, local filesystem, in-memory) must implement this
/// trait so the transfer services can work with any backend without coupling
/// to implementation details.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store an object under the given key, replacing any previous content.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Store an object from an async reader, returning the number of bytes
    /// written. Used by the relayed write endpoint so request bodies are not
    /// buffered wholesale.
    async fn put_stream(
        &self,
        key: &str,
        reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
    ) -> StorageResult<u64>;

    /// Fetch an object fully into memory. Intended for small objects; archive
    /// assembly uses `get_stream`.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Fetch an object as a chunked byte stream.
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream>;

    /// Delete an object. Deleting a missing object is an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Size and backend hash of an object, if it exists.
    async fn head(&self, key: &str) -> StorageResult<ObjectInfo>;

    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self.head(key).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Native presigned GET URL for direct reads, or `None` when the backend
    /// cannot presign and reads must be relayed through the service.
    async fn presigned_get_url(
        &self,
        key: &str,
        expires_in: Duration,
    ) -> StorageResult<Option<String>>;

    /// Native presigned PUT URL for direct writes, or `None` when writes must
    /// be relayed through the service.
    async fn presigned_put_url(
        &self,
        key: &str,
        expires_in: Duration,
    ) -> StorageResult<Option<String>>;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}
