use axum::http::StatusCode;
use thiserror::Error;
use uuid::Uuid;

use super::model::JobStatus;
use super::repository::RepositoryError;
use crate::common::response::ApiError;
use crate::infrastructure::queue::QueueError;
use crate::infrastructure::storage::StorageError;

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error("Job {0} has not completed")]
    NotCompleted(Uuid),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid callback: {0}")]
    InvalidCallback(String),

    #[error("Conflicting callback for job {id}: job is {current}, callback reported {reported}")]
    ConflictingCallback {
        id: Uuid,
        current: JobStatus,
        reported: JobStatus,
    },

    #[error("Job {id} is {current} and cannot be {action}")]
    InvalidTransition {
        id: Uuid,
        current: JobStatus,
        action: &'static str,
    },

    #[error("Job {0} is COMPLETED but has no processed file")]
    IntegrityFault(Uuid),

    #[error("Storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("Dispatch failure: {0}")]
    Dispatch(#[from] QueueError),

    #[error("Job store failure: {0}")]
    Repository(#[from] RepositoryError),
}

impl JobError {
    pub fn invalid_callback(msg: impl Into<String>) -> Self {
        Self::InvalidCallback(msg.into())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            JobError::NotFound(_) | JobError::NotCompleted(_) => StatusCode::NOT_FOUND,
            JobError::InvalidRequest(_) | JobError::InvalidCallback(_) => StatusCode::BAD_REQUEST,
            JobError::ConflictingCallback { .. } | JobError::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
            JobError::Storage(StorageError::NotFound(_)) => StatusCode::NOT_FOUND,
            JobError::IntegrityFault(_)
            | JobError::Storage(_)
            | JobError::Dispatch(_)
            | JobError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JobError> for ApiError {
    fn from(e: JobError) -> Self {
        let status = e.status_code();
        if status.is_server_error() {
            tracing::error!("{}", e);
        }
        ApiError(e.to_string(), status)
    }
}
