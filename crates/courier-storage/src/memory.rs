use crate::traits::{ByteStream, ObjectInfo, Storage, StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use courier_core::StorageBackend;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::RwLock;

const STREAM_CHUNK_BYTES: usize = 64 * 1024;

/// Volatile in-process storage.
///
/// Objects live in a shared map for the lifetime of the process. Used by the
/// test suites and for development runs without a filesystem or bucket.
/// Reports a sha-256 digest as the object etag.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    objects: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn digest(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.objects.write().await.insert(key.to_string(), data);
        Ok(())
    }

    async fn put_stream(
        &self,
        key: &str,
        mut reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
    ) -> StorageResult<u64> {
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .await
            .map_err(|e| StorageError::WriteFailed(format!("{}: {}", key, e)))?;
        let written = data.len() as u64;
        self.objects
            .write()
            .await
            .insert(key.to_string(), Bytes::from(data));
        Ok(written)
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        let data = self.get(key).await?;
        let mut chunks = Vec::new();
        let mut rest = data;
        while rest.len() > STREAM_CHUNK_BYTES {
            chunks.push(Ok(rest.split_to(STREAM_CHUNK_BYTES)));
        }
        chunks.push(Ok(rest));
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.objects
            .write()
            .await
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectInfo> {
        let guard = self.objects.read().await;
        let data = guard
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(ObjectInfo {
            size: data.len() as u64,
            etag: Some(Self::digest(data)),
        })
    }

    async fn presigned_get_url(
        &self,
        _key: &str,
        _expires_in: Duration,
    ) -> StorageResult<Option<String>> {
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
        StorageBackend::Memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_round_trip_and_etag() {
        let storage = MemoryStorage::new();
        storage
            .put("transfers/u/f", Bytes::from_static(b"payload"))
            .await
            .unwrap();

        let info = storage.head("transfers/u/f").await.unwrap();
        assert_eq!(info.size, 7);
        // Same content, same digest.
        assert_eq!(info.etag, Some(MemoryStorage::digest(b"payload")));

        storage.delete("transfers/u/f").await.unwrap();
        assert!(!storage.exists("transfers/u/f").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_stream_chunks_large_objects() {
        let storage = MemoryStorage::new();
        let data = vec![7u8; STREAM_CHUNK_BYTES * 2 + 17];
        storage
            .put("transfers/u/big", Bytes::from(data.clone()))
            .await
            .unwrap();

        let stream = storage.get_stream("transfers/u/big").await.unwrap();
        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
        assert!(chunks.len() >= 3);
        assert_eq!(chunks.concat(), data);
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let storage = MemoryStorage::new();
        assert!(matches!(
            storage.get("transfers/u/missing").await,
            Err(StorageError::NotFound(_))
        ));
    }
}
