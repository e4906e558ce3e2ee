//! Blob storage for job input and output artifacts.
//!
//! The orchestrator and worker only see [`BlobStore`]; the S3/MinIO adapter
//! lives in [`s3`].

use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub mod multipart;
pub mod s3;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Presign failed: {0}")]
    PresignFailed(String),
}

impl StorageError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores a new artifact under a freshly generated key and returns that key.
    async fn store(&self, filename: &str, data: Bytes, content_type: &str) -> StorageResult<String> {
        let key = generate_key(filename);
        self.put(&key, data, content_type).await?;
        Ok(key)
    }

    /// Writes an artifact at a caller-chosen key, replacing any previous object.
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()>;

    async fn fetch(&self, key: &str) -> StorageResult<Bytes>;

    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Time-limited URL a worker can download the object from.
    async fn sign_url(&self, key: &str, expires_in: Duration) -> StorageResult<String>;
}

/// `<random uuid>/<filename>`; the random namespace keeps keys unique per
/// upload while the filename keeps its extension for content-type inference.
pub fn generate_key(filename: &str) -> String {
    format!("{}/{}", Uuid::new_v4(), sanitize_filename(filename))
}

fn sanitize_filename(filename: &str) -> String {
    let base = Path::new(filename.trim())
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("");

    let cleaned: String = base
        .chars()
        .map(|c| if c.is_control() || c == '\\' { '_' } else { c })
        .collect();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "upload".to_string()
    } else {
        cleaned
    }
}
