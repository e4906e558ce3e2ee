use axum::extract::{Multipart, multipart::Field};
use bytes::BytesMut;
use std::collections::HashMap;
use tracing::{debug, error};

use crate::common::response::ApiError;
use crate::modules::job::service::{JobOptions, JobUpload};

const FILE_FIELD: &str = "file";
const DEFAULT_FILENAME: &str = "upload";

/// Reads a job submission form: the `file` part, `outputFormat`,
/// `outputQuality` and any number of `settings[<key>]` fields.
pub async fn read_job_form(mut multipart: Multipart) -> Result<(JobUpload, JobOptions), ApiError> {
    let mut upload = None;
    let mut options = JobOptions::default();
    let mut settings = HashMap::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        error!("Multipart error: {}", e);
        ApiError::bad_request(format!("Malformed multipart body: {}", e))
    })? {
        let name = field.name().unwrap_or("").to_string();

        if name == FILE_FIELD {
            upload = Some(read_file(field).await?);
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| ApiError::bad_request(format!("Unreadable field '{}': {}", name, e)))?;

        match name.as_str() {
            "outputFormat" => options.output_format = Some(value),
            "outputQuality" => options.output_quality = Some(value),
            other => match settings_key(other) {
                Some(key) => {
                    settings.insert(key.to_string(), value);
                }
                None => debug!("Ignoring unknown form field '{}'", other),
            },
        }
    }

    let upload = upload.ok_or_else(|| ApiError::bad_request("Missing 'file' field"))?;
    if !settings.is_empty() {
        options.settings = Some(settings);
    }

    Ok((upload, options))
}

async fn read_file(mut field: Field<'_>) -> Result<JobUpload, ApiError> {
    let filename = field
        .file_name()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or(DEFAULT_FILENAME)
        .to_string();
    let content_type = field
        .content_type()
        .map(str::to_string)
        .unwrap_or_else(|| {
            mime_guess::from_path(&filename)
                .first_or_octet_stream()
                .to_string()
        });

    let mut buffer = BytesMut::new();
    while let Some(chunk) = field.chunk().await.map_err(|e| {
        error!("Stream error: {}", e);
        ApiError::bad_request("Upload stream interrupted")
    })? {
        buffer.extend_from_slice(&chunk);
    }

    Ok(JobUpload {
        filename,
        content_type,
        data: buffer.freeze(),
    })
}

/// `settings[resize]` -> `resize`.
fn settings_key(name: &str) -> Option<&str> {
    name.strip_prefix("settings[")
        .and_then(|rest| rest.strip_suffix(']'))
        .filter(|key| !key.is_empty())
}
