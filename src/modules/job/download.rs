use axum::{
    body::Body,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use super::error::{JobError, JobResult};
use super::model::JobStatus;
use super::service::JobService;
use crate::common::response::ApiError;

const FALLBACK_PROXY_FILENAME: &str = "download";

/// A processed artifact ready to be sent as an attachment.
#[derive(Debug, Clone)]
pub struct Download {
    pub bytes: Bytes,
    pub filename: String,
    pub content_type: String,
}

impl IntoResponse for Download {
    fn into_response(self) -> Response {
        (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, self.content_type),
                (header::CONTENT_DISPOSITION, attachment(&self.filename)),
            ],
            self.bytes,
        )
            .into_response()
    }
}

impl JobService {
    pub async fn resolve_download(&self, id: Uuid) -> JobResult<Download> {
        let job = self.get_job(id).await?;

        let Some(key) = job.processed_file_key.as_deref() else {
            if job.status == JobStatus::Completed {
                return Err(JobError::IntegrityFault(id));
            }
            return Err(JobError::NotCompleted(id));
        };

        let bytes = self.storage().fetch(key).await?;
        info!("Serving {} bytes for job {}", bytes.len(), id);

        Ok(Download {
            bytes,
            filename: download_filename(&job.original_filename, &job.output_format),
            content_type: content_type_for(&job.output_format),
        })
    }
}

/// `<stem of the original name>.<output format>`.
pub fn download_filename(original_filename: &str, output_format: &str) -> String {
    let stem = match original_filename.rfind('.') {
        Some(idx) if idx > 0 => &original_filename[..idx],
        _ => original_filename,
    };
    format!("{}.{}", stem, output_format.to_lowercase())
}

pub fn content_type_for(output_format: &str) -> String {
    match output_format.to_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg".to_string(),
        other => format!("image/{}", other),
    }
}

/// `attachment` disposition with a quoted ASCII fallback name, plus an
/// RFC 5987 `filename*` when the real name is not plain ASCII.
fn attachment(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| match c {
            '"' => '\'',
            '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();

    if filename.is_ascii() {
        format!("attachment; filename=\"{}\"", fallback)
    } else {
        format!(
            "attachment; filename=\"{}\"; filename*=UTF-8''{}",
            fallback,
            urlencoding::encode(filename)
        )
    }
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Invalid download URL: {0}")]
    InvalidUrl(String),

    #[error("Upstream responded with {0}")]
    Upstream(StatusCode),

    #[error("Upstream request failed: {0}")]
    Request(#[from] reqwest::Error),
}

impl From<ProxyError> for ApiError {
    fn from(e: ProxyError) -> Self {
        let status = match &e {
            ProxyError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            ProxyError::Upstream(status) => *status,
            ProxyError::Request(_) => StatusCode::BAD_GATEWAY,
        };
        ApiError(e.to_string(), status)
    }
}

/// Upstream response being relayed to the client.
pub struct ProxiedDownload {
    pub filename: String,
    pub content_type: String,
    upstream: reqwest::Response,
}

impl IntoResponse for ProxiedDownload {
    fn into_response(self) -> Response {
        let disposition = attachment(&self.filename);
        let body = Body::from_stream(self.upstream.bytes_stream());
        (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, self.content_type),
                (header::CONTENT_DISPOSITION, disposition),
            ],
            body,
        )
            .into_response()
    }
}

/// Fetches an arbitrary http(s) URL and relays it as an attachment.
pub async fn proxy_download(http: &reqwest::Client, raw_url: &str) -> Result<ProxiedDownload, ProxyError> {
    let url = Url::parse(raw_url.trim()).map_err(|e| ProxyError::InvalidUrl(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ProxyError::InvalidUrl(format!(
            "unsupported scheme '{}'",
            url.scheme()
        )));
    }

    let filename = proxy_filename(&url);
    info!("Proxying download of {}", url);

    let upstream = http.get(url.clone()).send().await?;
    if !upstream.status().is_success() {
        warn!("Upstream {} answered {}", url, upstream.status());
        return Err(ProxyError::Upstream(upstream.status()));
    }

    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| {
            mime_guess::from_path(&filename)
                .first_or_octet_stream()
                .to_string()
        });

    Ok(ProxiedDownload {
        filename,
        content_type,
        upstream,
    })
}

fn proxy_filename(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| FALLBACK_PROXY_FILENAME.to_string())
}
