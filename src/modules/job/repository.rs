use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::types::Json;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use super::model::{Job, JobOutcome, JobStatus};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Job store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                RepositoryError::Unavailable(e.to_string())
            }
            other => RepositoryError::Database(other),
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Durable job records. Every status change is a conditional write so two
/// concurrent writers can never both move the same job.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn insert(&self, job: &Job) -> RepositoryResult<Job>;

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Job>>;

    /// Jobs in `status`, oldest `created_at` first.
    async fn list_by_status(&self, status: JobStatus) -> RepositoryResult<Vec<Job>>;

    /// Jobs in `status` not touched since `before`, oldest first.
    async fn list_stale(
        &self,
        status: JobStatus,
        before: OffsetDateTime,
        limit: i64,
    ) -> RepositoryResult<Vec<Job>>;

    async fn count_by_status(&self) -> RepositoryResult<Vec<(JobStatus, i64)>>;

    /// Returns false when no row was deleted.
    async fn delete(&self, id: Uuid) -> RepositoryResult<bool>;

    /// QUEUED -> PROCESSING. `None` when the job was not QUEUED.
    async fn mark_processing(&self, id: Uuid) -> RepositoryResult<Option<Job>>;

    /// Non-terminal -> terminal. `None` when the job was already terminal
    /// (or missing); the caller re-reads to find out which.
    async fn finish(&self, id: Uuid, outcome: &JobOutcome) -> RepositoryResult<Option<Job>>;

    /// Bumps `updated_at` only while the job is still in `status`. Used as
    /// the claim before a re-dispatch; false means someone else moved it.
    async fn touch(&self, id: Uuid, status: JobStatus) -> RepositoryResult<bool>;
}

const JOB_COLUMNS: &str = "id, original_filename, original_file_key, processed_file_key, status, \
     error_message, output_format, output_quality, settings, created_at, updated_at, completed_at";

#[derive(Clone)]
pub struct PgJobRepository {
    pool: PgPool,
}

impl PgJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn insert(&self, job: &Job) -> RepositoryResult<Job> {
        let sql = format!(
            r#"
            INSERT INTO jobs (id, original_filename, original_file_key, status,
                              output_format, output_quality, settings, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            RETURNING {JOB_COLUMNS}
            "#
        );

        let job = sqlx::query_as::<_, Job>(&sql)
            .bind(job.id)
            .bind(&job.original_filename)
            .bind(&job.original_file_key)
            .bind(job.status)
            .bind(&job.output_format)
            .bind(&job.output_quality)
            .bind(Json(&job.settings.0))
            .bind(job.created_at)
            .fetch_one(&self.pool)
            .await?;

        Ok(job)
    }

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1");

        let job = sqlx::query_as::<_, Job>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(job)
    }

    async fn list_by_status(&self, status: JobStatus) -> RepositoryResult<Vec<Job>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = $1 ORDER BY created_at ASC, id ASC"
        );

        let jobs = sqlx::query_as::<_, Job>(&sql)
            .bind(status)
            .fetch_all(&self.pool)
            .await?;

        Ok(jobs)
    }

    async fn list_stale(
        &self,
        status: JobStatus,
        before: OffsetDateTime,
        limit: i64,
    ) -> RepositoryResult<Vec<Job>> {
        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            WHERE status = $1 AND updated_at < $2
            ORDER BY created_at ASC, id ASC
            LIMIT $3
            "#
        );

        let jobs = sqlx::query_as::<_, Job>(&sql)
            .bind(status)
            .bind(before)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(jobs)
    }

    async fn count_by_status(&self) -> RepositoryResult<Vec<(JobStatus, i64)>> {
        let counts = sqlx::query_as::<_, (JobStatus, i64)>(
            "SELECT status, COUNT(*) FROM jobs GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(counts)
    }

    async fn delete(&self, id: Uuid) -> RepositoryResult<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_processing(&self, id: Uuid) -> RepositoryResult<Option<Job>> {
        let sql = format!(
            r#"
            UPDATE jobs
            SET status = 'PROCESSING', updated_at = NOW()
            WHERE id = $1 AND status = 'QUEUED'
            RETURNING {JOB_COLUMNS}
            "#
        );

        let job = sqlx::query_as::<_, Job>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(job)
    }

    async fn finish(&self, id: Uuid, outcome: &JobOutcome) -> RepositoryResult<Option<Job>> {
        let (processed_file_key, error_message) = match outcome {
            JobOutcome::Completed { processed_file_key } => (Some(processed_file_key.as_str()), None),
            JobOutcome::Failed { error_message } => (None, Some(error_message.as_str())),
        };

        // The status predicate is re-checked under the row lock, so only one
        // of several concurrent finishers gets a row back.
        let sql = format!(
            r#"
            UPDATE jobs
            SET status = $2,
                processed_file_key = $3,
                error_message = $4,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status IN ('QUEUED', 'PROCESSING')
            RETURNING {JOB_COLUMNS}
            "#
        );

        let job = sqlx::query_as::<_, Job>(&sql)
            .bind(id)
            .bind(outcome.status())
            .bind(processed_file_key)
            .bind(error_message)
            .fetch_optional(&self.pool)
            .await?;

        Ok(job)
    }

    async fn touch(&self, id: Uuid, status: JobStatus) -> RepositoryResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(status)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
