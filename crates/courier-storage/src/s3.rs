use crate::traits::{ByteStream, ObjectInfo, Storage, StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use courier_core::StorageBackend;
use futures::StreamExt;
use http::Method;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::Error as ObjectStoreError;
use object_store::{ObjectStoreExt, PutPayload, Result as ObjectResult};
use std::pin::Pin;
use std::time::Duration;
use tokio::io::AsyncRead;

/// S3 storage implementation
#[derive(Clone)]
pub struct S3Storage {
    store: AmazonS3,
    bucket: String,
}

impl S3Storage {
    /// Create a new S3Storage instance
    ///
    /// # Arguments
    /// * `bucket` - S3 bucket name
    /// * `region` - AWS region (or region identifier for S3-compatible providers)
    /// * `endpoint_url` - Optional custom endpoint URL for S3-compatible providers
    ///   (e.g., "http://localhost:9000" for MinIO)
    pub async fn new(
        bucket: String,
        region: String,
        endpoint_url: Option<String>,
    ) -> StorageResult<Self> {
        // Build AmazonS3 object store from environment and explicit settings.
        let mut builder = AmazonS3Builder::from_env()
            .with_region(region)
            .with_bucket_name(bucket.clone());

        if let Some(ref endpoint) = endpoint_url {
            let allow_http = endpoint.starts_with("http://");
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(allow_http);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        Ok(S3Storage { store, bucket })
    }

    fn map_error(key: &str, err: ObjectStoreError) -> StorageError {
        match err {
            ObjectStoreError::NotFound { .. } => StorageError::NotFound(key.to_string()),
            other => StorageError::BackendError(other.to_string()),
        }
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let size = data.len() as u64;
        let location = Path::from(key.to_string());
        let start = std::time::Instant::now();

        let result: ObjectResult<_> = self.store.put(&location, PutPayload::from(data)).await;

        result.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %self.bucket,
                key = %key,
                size_bytes = size,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "S3 put failed"
            );
            StorageError::WriteFailed(e.to_string())
        })?;

        tracing::debug!(
            bucket = %self.bucket,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 put successful"
        );

        Ok(())
    }

    async fn put_stream(
        &self,
        key: &str,
        mut reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
    ) -> StorageResult<u64> {
        // Read the stream into memory and upload in a single put. Relayed
        // writes on an S3 deployment are the rare path (clients normally get
        // a native presigned URL), so the simpler implementation wins over a
        // multipart pipeline here.
        let mut buffer = Vec::new();
        let mut temp_buf = vec![0u8; 8192];

        loop {
            let bytes_read = tokio::io::AsyncReadExt::read(&mut reader, &mut temp_buf)
                .await
                .map_err(|e| {
                    StorageError::WriteFailed(format!("Failed to read from stream: {}", e))
                })?;

            if bytes_read == 0 {
                break;
            }

            buffer.extend_from_slice(&temp_buf[..bytes_read]);
        }

        let written = buffer.len() as u64;
        self.put(key, Bytes::from(buffer)).await?;
        Ok(written)
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let location = Path::from(key.to_string());

        let result: ObjectResult<_> = self.store.get(&location).await;
        let result = result.map_err(|e| Self::map_error(key, e))?;

        result
            .bytes()
            .await
            .map_err(|e| StorageError::ReadFailed(e.to_string()))
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        let location = Path::from(key.to_string());

        let result: ObjectResult<_> = self.store.get(&location).await;
        let result = result.map_err(|e| Self::map_error(key, e))?;

        let bucket = self.bucket.clone();
        let key = key.to_string();

        let stream = result.into_stream().map(move |res| match res {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                tracing::error!(
                    bucket = %bucket,
                    key = %key,
                    error = %e,
                    "S3 stream read error"
                );
                Err(StorageError::ReadFailed(e.to_string()))
            }
        });

        Ok(Box::pin(stream))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let location = Path::from(key.to_string());

        let result: ObjectResult<_> = self.store.delete(&location).await;
        result.map_err(|e| match e {
            ObjectStoreError::NotFound { .. } => StorageError::NotFound(key.to_string()),
            other => StorageError::DeleteFailed(other.to_string()),
        })?;

        Ok(())
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectInfo> {
        let location = Path::from(key.to_string());
        let meta = self
            .store
            .head(&location)
            .await
            .map_err(|e| Self::map_error(key, e))?;

        Ok(ObjectInfo {
            size: meta.size as u64,
            etag: meta.e_tag.clone(),
        })
    }

    async fn presigned_get_url(
        &self,
        key: &str,
        expires_in: Duration,
    ) -> StorageResult<Option<String>> {
        let location = Path::from(key.to_string());
        let url_result: ObjectResult<_> =
            self.store.signed_url(Method::GET, &location, expires_in).await;

        let url = url_result
            .map_err(|e| StorageError::BackendError(e.to_string()))?
            .to_string();

        Ok(Some(url))
    }

    async fn presigned_put_url(
        &self,
        key: &str,
        expires_in: Duration,
    ) -> StorageResult<Option<String>> {
        let location = Path::from(key.to_string());
        let url_result: ObjectResult<_> =
            self.store.signed_url(Method::PUT, &location, expires_in).await;

        let url = url_result
            .map_err(|e| StorageError::BackendError(e.to_string()))?
            .to_string();

        tracing::debug!(bucket = %self.bucket, key = %key, "Generated presigned PUT URL");

        Ok(Some(url))
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::S3
    }
}
