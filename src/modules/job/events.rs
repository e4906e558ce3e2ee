use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;
use uuid::Uuid;

use super::model::Job;

/// Queue payload telling a worker to process one job. Consumers ignore
/// fields they do not know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchMessage {
    pub id: Uuid,
    pub input_url: String,
    pub output_format: String,
    pub output_quality: String,
    #[serde(default)]
    pub settings: HashMap<String, String>,
    pub callback_url: String,
}

impl DispatchMessage {
    pub fn for_job(job: &Job, input_url: String, callback_url: &str) -> Self {
        Self {
            id: job.id,
            input_url,
            output_format: job.output_format.clone(),
            output_quality: job.output_quality.clone(),
            settings: job.settings.0.clone(),
            callback_url: callback_url.to_string(),
        }
    }
}

pub const CALLBACK_COMPLETED: &str = "completed";
pub const CALLBACK_FAILED: &str = "failed";

/// Outcome report posted by a worker to the callback endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WorkerCallback {
    pub job_id: String,
    pub status: String,
    #[serde(default)]
    pub processed_file_key: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl WorkerCallback {
    pub fn completed(job_id: Uuid, processed_file_key: impl Into<String>) -> Self {
        Self {
            job_id: job_id.to_string(),
            status: CALLBACK_COMPLETED.to_string(),
            processed_file_key: Some(processed_file_key.into()),
            error_message: None,
        }
    }

    pub fn failed(job_id: Uuid, error_message: impl Into<String>) -> Self {
        Self {
            job_id: job_id.to_string(),
            status: CALLBACK_FAILED.to_string(),
            processed_file_key: None,
            error_message: Some(error_message.into()),
        }
    }
}
