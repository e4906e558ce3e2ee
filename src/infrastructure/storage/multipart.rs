use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::Bytes;

use super::s3::S3Storage;
use super::{StorageError, StorageResult};

// Minimum part size for S3 is 5MB. We use 6MB to be safe.
pub const MIN_PART_SIZE: usize = 6 * 1024 * 1024;

/// Uploads a large artifact as S3 multipart parts, buffering until each part
/// reaches [`MIN_PART_SIZE`].
pub struct MultipartUploader<'a> {
    storage: &'a S3Storage,
    key: String,
    upload_id: String,
    parts: Vec<CompletedPart>,
    part_number: i32,
    buffer: Vec<u8>,
}

impl<'a> MultipartUploader<'a> {
    pub async fn new(storage: &'a S3Storage, key: String, content_type: &str) -> StorageResult<Self> {
        let result = storage
            .client
            .create_multipart_upload()
            .bucket(&storage.bucket)
            .key(&key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(format!("Failed to initiate upload: {}", e)))?;

        let upload_id = result
            .upload_id
            .ok_or_else(|| StorageError::upload_failed("S3 returned no upload id"))?;

        Ok(Self {
            storage,
            key,
            upload_id,
            parts: Vec::new(),
            part_number: 1,
            buffer: Vec::with_capacity(MIN_PART_SIZE),
        })
    }

    pub async fn write_chunk(&mut self, chunk: Bytes) -> StorageResult<()> {
        self.buffer.extend_from_slice(&chunk);

        if self.buffer.len() >= MIN_PART_SIZE {
            self.flush_part().await?;
        }

        Ok(())
    }

    async fn flush_part(&mut self) -> StorageResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let body = Bytes::from(std::mem::replace(
            &mut self.buffer,
            Vec::with_capacity(MIN_PART_SIZE),
        ));

        let result = self
            .storage
            .client
            .upload_part()
            .bucket(&self.storage.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .part_number(self.part_number)
            .body(aws_sdk_s3::primitives::ByteStream::from(body))
            .send()
            .await
            .map_err(|e| {
                StorageError::upload_failed(format!("Failed to upload part {}: {}", self.part_number, e))
            })?;

        let e_tag = result.e_tag.ok_or_else(|| {
            StorageError::upload_failed(format!("Part {} returned no ETag", self.part_number))
        })?;

        self.parts.push(
            CompletedPart::builder()
                .e_tag(e_tag)
                .part_number(self.part_number)
                .build(),
        );
        self.part_number += 1;

        Ok(())
    }

    pub async fn finish(mut self) -> StorageResult<()> {
        // Upload remaining buffer as last part
        self.flush_part().await?;

        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(self.parts))
            .build();

        self.storage
            .client
            .complete_multipart_upload()
            .bucket(&self.storage.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(format!("Failed to complete upload: {}", e)))?;

        Ok(())
    }

    pub async fn abort(&self) -> StorageResult<()> {
        self.storage
            .client
            .abort_multipart_upload()
            .bucket(&self.storage.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(format!("Failed to abort upload: {}", e)))?;

        Ok(())
    }
}
