use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;

pub const DEFAULT_OUTPUT_QUALITY: &str = "medium";
pub const DEFAULT_FAILURE_MESSAGE: &str = "Transcoding failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "job_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Queued,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    /// Terminal states never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown job status '{}'", s))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub original_filename: String,
    pub original_file_key: String,
    pub processed_file_key: Option<String>,
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub output_format: String,
    pub output_quality: String,
    #[schema(value_type = Object)]
    pub settings: Json<HashMap<String, String>>,
    #[serde(with = "time::serde::iso8601")]
    #[schema(value_type = String, format = DateTime)]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::iso8601")]
    #[schema(value_type = String, format = DateTime)]
    pub updated_at: OffsetDateTime,
    #[serde(with = "time::serde::iso8601::option")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub completed_at: Option<OffsetDateTime>,
}

/// Fields of a job fixed at creation time; everything else is derived.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub original_filename: String,
    pub original_file_key: String,
    pub output_format: String,
    pub output_quality: String,
    pub settings: HashMap<String, String>,
}

impl NewJob {
    pub fn into_job(self, now: OffsetDateTime) -> Job {
        Job {
            id: Uuid::new_v4(),
            original_filename: self.original_filename,
            original_file_key: self.original_file_key,
            processed_file_key: None,
            status: JobStatus::Queued,
            error_message: None,
            output_format: self.output_format,
            output_quality: self.output_quality,
            settings: Json(self.settings),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// Terminal result reported for a job, by a worker or an operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { processed_file_key: String },
    Failed { error_message: String },
}

impl JobOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            JobOutcome::Completed { .. } => JobStatus::Completed,
            JobOutcome::Failed { .. } => JobStatus::Failed,
        }
    }

    /// Whether `job` already records this outcome. A failure matches any
    /// failure; a completion must also name the same artifact.
    pub fn matches(&self, job: &Job) -> bool {
        match self {
            JobOutcome::Completed { processed_file_key } => {
                job.status == JobStatus::Completed
                    && job.processed_file_key.as_deref() == Some(processed_file_key.as_str())
            }
            JobOutcome::Failed { .. } => job.status == JobStatus::Failed,
        }
    }
}

impl Job {
    /// Applies a terminal outcome in memory, following the same rules as the
    /// conditional update in the repository.
    pub fn finish(&mut self, outcome: &JobOutcome, now: OffsetDateTime) {
        match outcome {
            JobOutcome::Completed { processed_file_key } => {
                self.processed_file_key = Some(processed_file_key.clone());
                self.error_message = None;
            }
            JobOutcome::Failed { error_message } => {
                self.error_message = Some(error_message.clone());
                self.processed_file_key = None;
            }
        }
        self.status = outcome.status();
        self.completed_at = Some(now);
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobStats {
    pub total_jobs: i64,
    pub queued_jobs: i64,
    pub processing_jobs: i64,
    pub completed_jobs: i64,
    pub failed_jobs: i64,
}

impl JobStats {
    pub fn from_counts(counts: impl IntoIterator<Item = (JobStatus, i64)>) -> Self {
        let mut stats = JobStats::default();
        for (status, count) in counts {
            match status {
                JobStatus::Queued => stats.queued_jobs += count,
                JobStatus::Processing => stats.processing_jobs += count,
                JobStatus::Completed => stats.completed_jobs += count,
                JobStatus::Failed => stats.failed_jobs += count,
            }
            stats.total_jobs += count;
        }
        stats
    }
}
