use async_trait::async_trait;
use aws_sdk_s3::config::Builder;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::{Client, config::BehaviorVersion, config::Credentials, config::Region};
use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::multipart::{MIN_PART_SIZE, MultipartUploader};
use super::{BlobStore, StorageError, StorageResult};

#[derive(Clone)]
pub struct S3Storage {
    pub client: Client,
    pub bucket: String,
}

impl S3Storage {
    pub async fn new(endpoint: &str, bucket: &str, access_key: &str, secret_key: &str) -> Self {
        let credentials = Credentials::new(access_key, secret_key, None, None, "static");

        let config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(endpoint)
            .credentials_provider(credentials)
            .force_path_style(true) // Required for MinIO
            .build();

        let client = Client::from_conf(config);

        info!("✅ Connected to S3 (MinIO), bucket '{}'", bucket);

        Self {
            client,
            bucket: bucket.to_string(),
        }
    }

    async fn put_single(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(format!("{}: {}", key, e)))?;

        Ok(())
    }

    async fn put_multipart(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()> {
        let mut uploader = MultipartUploader::new(self, key.to_string(), content_type).await?;

        for offset in (0..data.len()).step_by(MIN_PART_SIZE) {
            let end = usize::min(offset + MIN_PART_SIZE, data.len());
            if let Err(e) = uploader.write_chunk(data.slice(offset..end)).await {
                if let Err(abort) = uploader.abort().await {
                    warn!("Abort of multipart upload {} failed: {}", key, abort);
                }
                return Err(e);
            }
        }

        uploader.finish().await
    }
}

#[async_trait]
impl BlobStore for S3Storage {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()> {
        debug!("Uploading {} bytes to {}", data.len(), key);

        if data.len() > MIN_PART_SIZE {
            self.put_multipart(key, data, content_type).await
        } else {
            self.put_single(key, data, content_type).await
        }
    }

    async fn fetch(&self, key: &str) -> StorageResult<Bytes> {
        debug!("Downloading {}", key);

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let missing = e
                    .as_service_error()
                    .map(|se| se.is_no_such_key())
                    .unwrap_or(false);
                if missing {
                    StorageError::not_found(key)
                } else {
                    StorageError::DownloadFailed(format!("{}: {}", key, e))
                }
            })?;

        let body = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::DownloadFailed(format!("{}: {}", key, e)))?;

        Ok(body.into_bytes())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        debug!("Deleting {}", key);

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::DeleteFailed(format!("{}: {}", key, e)))?;

        Ok(())
    }

    async fn sign_url(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        let presign_config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        Ok(presigned.uri().to_string())
    }
}
