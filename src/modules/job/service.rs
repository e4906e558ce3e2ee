use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::error::{JobError, JobResult};
use super::events::{CALLBACK_COMPLETED, CALLBACK_FAILED, DispatchMessage, WorkerCallback};
use super::model::{
    DEFAULT_FAILURE_MESSAGE, DEFAULT_OUTPUT_QUALITY, Job, JobOutcome, JobStats, JobStatus, NewJob,
};
use super::repository::JobRepository;
use crate::config::settings::PipelineConfig;
use crate::infrastructure::queue::JobPublisher;
use crate::infrastructure::storage::BlobStore;

/// An uploaded input artifact.
#[derive(Debug, Clone)]
pub struct JobUpload {
    pub filename: String,
    pub content_type: String,
    pub data: Bytes,
}

#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    pub output_format: Option<String>,
    pub output_quality: Option<String>,
    pub settings: Option<HashMap<String, String>>,
}

/// Result of a create: the job is always durable; `dispatched` says whether
/// the dispatch message made it onto the queue.
#[derive(Debug, Clone)]
pub struct JobCreation {
    pub job: Job,
    pub dispatched: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallbackAck {
    Applied(Job),
    AlreadyApplied(Job),
}

impl CallbackAck {
    pub fn job(&self) -> &Job {
        match self {
            CallbackAck::Applied(job) | CallbackAck::AlreadyApplied(job) => job,
        }
    }
}

/// Owns the job lifecycle: creation, dispatch, and reconciliation of worker
/// outcomes. Cheap to clone; all state lives behind the injected stores.
#[derive(Clone)]
pub struct JobService {
    repo: Arc<dyn JobRepository>,
    storage: Arc<dyn BlobStore>,
    publisher: Arc<dyn JobPublisher>,
    config: PipelineConfig,
}

impl JobService {
    pub fn new(
        repo: Arc<dyn JobRepository>,
        storage: Arc<dyn BlobStore>,
        publisher: Arc<dyn JobPublisher>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            repo,
            storage,
            publisher,
            config,
        }
    }

    pub fn storage(&self) -> &Arc<dyn BlobStore> {
        &self.storage
    }

    pub async fn create_job(&self, upload: JobUpload, options: JobOptions) -> JobResult<JobCreation> {
        if upload.data.is_empty() {
            return Err(JobError::invalid_request("Uploaded file is empty"));
        }

        let output_format = non_blank(options.output_format)
            .unwrap_or_else(|| self.config.default_output_format.clone());
        let output_quality =
            non_blank(options.output_quality).unwrap_or_else(|| DEFAULT_OUTPUT_QUALITY.to_string());

        info!("Storing file: {}", upload.filename);
        let file_key = self
            .storage
            .store(&upload.filename, upload.data, &upload.content_type)
            .await?;

        let input_url = match self.storage.sign_url(&file_key, self.config.signed_url_ttl).await {
            Ok(url) => url,
            Err(e) => {
                self.discard_blob(&file_key).await;
                return Err(e.into());
            }
        };

        let new_job = NewJob {
            original_filename: upload.filename,
            original_file_key: file_key.clone(),
            output_format,
            output_quality,
            settings: options.settings.unwrap_or_default(),
        };

        let job = match self.repo.insert(&new_job.into_job(OffsetDateTime::now_utc())).await {
            Ok(job) => job,
            Err(e) => {
                self.discard_blob(&file_key).await;
                return Err(e.into());
            }
        };
        info!("Job saved: {}", job.id);

        let message = DispatchMessage::for_job(&job, input_url, &self.config.callback_url);
        let dispatched = match self.publisher.publish(&message).await {
            Ok(()) => {
                info!("Job {} dispatched", job.id);
                true
            }
            Err(e) => {
                error!(
                    "Dispatch of job {} failed, left QUEUED for the sweeper: {}",
                    job.id, e
                );
                false
            }
        };

        Ok(JobCreation { job, dispatched })
    }

    pub async fn get_job(&self, id: Uuid) -> JobResult<Job> {
        self.repo.find_by_id(id).await?.ok_or(JobError::NotFound(id))
    }

    pub async fn get_jobs_by_status(&self, status: JobStatus) -> JobResult<Vec<Job>> {
        Ok(self.repo.list_by_status(status).await?)
    }

    /// QUEUED jobs, oldest first.
    pub async fn get_queued_jobs(&self) -> JobResult<Vec<Job>> {
        self.get_jobs_by_status(JobStatus::Queued).await
    }

    pub async fn job_stats(&self) -> JobResult<JobStats> {
        Ok(JobStats::from_counts(self.repo.count_by_status().await?))
    }

    /// Removes the record. Blob cleanup is best-effort and only on request.
    pub async fn delete_job(&self, id: Uuid, purge_files: bool) -> JobResult<()> {
        let job = self.get_job(id).await?;

        if !self.repo.delete(id).await? {
            return Err(JobError::NotFound(id));
        }
        info!("Job {} deleted", id);

        if purge_files {
            self.discard_blob(&job.original_file_key).await;
            if let Some(key) = &job.processed_file_key {
                self.discard_blob(key).await;
            }
        }

        Ok(())
    }

    pub async fn apply_callback(&self, callback: WorkerCallback) -> JobResult<CallbackAck> {
        let id = Uuid::parse_str(callback.job_id.trim())
            .map_err(|_| JobError::invalid_callback(format!("job_id '{}' is not a UUID", callback.job_id)))?;
        let outcome = parse_outcome(&callback)?;

        info!("Received worker callback for job {}: status={}", id, callback.status);
        self.finish(id, outcome).await
    }

    /// Worker start notification. Only QUEUED moves; anything else is left
    /// as it is and returned.
    pub async fn mark_processing(&self, id: Uuid) -> JobResult<Job> {
        if let Some(job) = self.repo.mark_processing(id).await? {
            info!("Job {} is processing", id);
            return Ok(job);
        }
        self.get_job(id).await
    }

    /// Operator re-dispatch of a job that is not terminal yet.
    pub async fn redispatch(&self, id: Uuid) -> JobResult<Job> {
        // A second look covers a QUEUED -> PROCESSING move between read and claim.
        for _ in 0..2 {
            let job = self.get_job(id).await?;
            if job.status.is_terminal() {
                return Err(JobError::InvalidTransition {
                    id,
                    current: job.status,
                    action: "re-dispatched",
                });
            }
            if self.republish(&job).await? {
                return self.get_job(id).await;
            }
        }

        let job = self.get_job(id).await?;
        Err(JobError::InvalidTransition {
            id,
            current: job.status,
            action: "re-dispatched",
        })
    }

    /// Operator fail-out of a job that is not terminal yet.
    pub async fn fail_job(&self, id: Uuid, reason: &str) -> JobResult<Job> {
        let outcome = JobOutcome::Failed {
            error_message: non_blank(Some(reason.to_string()))
                .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string()),
        };

        let current = match self.finish(id, outcome).await {
            Ok(CallbackAck::Applied(job)) => return Ok(job),
            Ok(CallbackAck::AlreadyApplied(job)) => job.status,
            Err(JobError::ConflictingCallback { current, .. }) => current,
            Err(e) => return Err(e),
        };
        Err(JobError::InvalidTransition {
            id,
            current,
            action: "failed",
        })
    }

    /// Claims `job` by bumping `updated_at` while it is still in the status
    /// it was read with, then re-signs the input and publishes a fresh
    /// dispatch message. Returns false, publishing nothing, when the job has
    /// moved since it was read.
    pub async fn republish(&self, job: &Job) -> JobResult<bool> {
        if !self.repo.touch(job.id, job.status).await? {
            info!("Job {} left {} before re-dispatch; skipped", job.id, job.status);
            return Ok(false);
        }

        let input_url = self
            .storage
            .sign_url(&job.original_file_key, self.config.signed_url_ttl)
            .await?;
        let message = DispatchMessage::for_job(job, input_url, &self.config.callback_url);

        self.publisher.publish(&message).await?;
        info!("Job {} re-dispatched", job.id);
        Ok(true)
    }

    pub async fn stale_jobs(
        &self,
        status: JobStatus,
        before: OffsetDateTime,
        limit: i64,
    ) -> JobResult<Vec<Job>> {
        Ok(self.repo.list_stale(status, before, limit).await?)
    }

    async fn finish(&self, id: Uuid, outcome: JobOutcome) -> JobResult<CallbackAck> {
        let current = self.get_job(id).await?;
        if current.status.is_terminal() {
            return resolve_terminal(current, &outcome).map(CallbackAck::AlreadyApplied);
        }

        match self.repo.finish(id, &outcome).await? {
            Some(job) => {
                info!("Updated job {} status to {}", id, job.status);
                Ok(CallbackAck::Applied(job))
            }
            None => {
                // Lost a race with another writer; judge against what won.
                let current = self.get_job(id).await?;
                resolve_terminal(current, &outcome).map(CallbackAck::AlreadyApplied)
            }
        }
    }

    async fn discard_blob(&self, key: &str) {
        if let Err(e) = self.storage.delete(key).await {
            warn!("Failed to delete blob {}: {}", key, e);
        }
    }
}

fn resolve_terminal(current: Job, outcome: &JobOutcome) -> JobResult<Job> {
    if outcome.matches(&current) {
        info!("Duplicate {} callback for job {} ignored", outcome.status(), current.id);
        return Ok(current);
    }

    warn!(
        "Conflicting callback for job {}: job is {}, callback reported {}; not applied",
        current.id,
        current.status,
        outcome.status()
    );
    Err(JobError::ConflictingCallback {
        id: current.id,
        current: current.status,
        reported: outcome.status(),
    })
}

fn parse_outcome(callback: &WorkerCallback) -> JobResult<JobOutcome> {
    let status = callback.status.trim();

    if status.eq_ignore_ascii_case(CALLBACK_COMPLETED) {
        let processed_file_key = non_blank(callback.processed_file_key.clone()).ok_or_else(|| {
            JobError::invalid_callback("processed_file_key is required for a completed callback")
        })?;
        Ok(JobOutcome::Completed { processed_file_key })
    } else if status.eq_ignore_ascii_case(CALLBACK_FAILED) {
        let error_message = non_blank(callback.error_message.clone())
            .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string());
        Ok(JobOutcome::Failed { error_message })
    } else {
        Err(JobError::invalid_callback(format!(
            "unknown status '{}'",
            callback.status
        )))
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::BlobStore;
    use crate::test_support::{Harness, upload};

    fn resize_settings() -> HashMap<String, String> {
        HashMap::from([
            ("resize".to_string(), "true".to_string()),
            ("width".to_string(), "800".to_string()),
            ("height".to_string(), "600".to_string()),
        ])
    }

    async fn queued(h: &Harness) -> Job {
        h.service
            .create_job(upload("photo.png", b"png-bytes"), JobOptions::default())
            .await
            .unwrap()
            .job
    }

    #[tokio::test]
    async fn create_persists_queued_job_and_dispatches_once() {
        let h = Harness::new();
        let created = h
            .service
            .create_job(
                upload("photo.png", b"png-bytes"),
                JobOptions {
                    output_format: Some("jpg".into()),
                    output_quality: Some("high".into()),
                    settings: Some(resize_settings()),
                },
            )
            .await
            .unwrap();

        let job = created.job;
        assert!(created.dispatched);
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.output_format, "jpg");
        assert_eq!(job.output_quality, "high");
        assert!(job.original_file_key.ends_with("/photo.png"));

        let sent = h.publisher.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id, job.id);
        assert_eq!(sent[0].settings, resize_settings());
        assert_eq!(sent[0].callback_url, h.config.callback_url);
        assert!(sent[0].input_url.contains(&job.original_file_key));

        assert_eq!(h.repo.get(job.id).unwrap(), job);
        assert!(h.storage.contains(&job.original_file_key));
    }

    #[tokio::test]
    async fn create_applies_defaults() {
        let h = Harness::new();
        let job = h
            .service
            .create_job(
                upload("clip.mov", b"mov"),
                JobOptions {
                    output_format: Some("  ".into()),
                    ..JobOptions::default()
                },
            )
            .await
            .unwrap()
            .job;

        assert_eq!(job.output_format, h.config.default_output_format);
        assert_eq!(job.output_quality, "medium");
        assert!(job.settings.is_empty());
    }

    #[tokio::test]
    async fn create_rejects_empty_file() {
        let h = Harness::new();
        let err = h
            .service
            .create_job(upload("empty.png", b""), JobOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::InvalidRequest(_)));
        assert!(h.storage.is_empty());
        assert!(h.publisher.sent().is_empty());
    }

    #[tokio::test]
    async fn storage_failure_aborts_before_persistence() {
        let h = Harness::new();
        h.storage.fail_writes(true);

        let err = h
            .service
            .create_job(upload("photo.png", b"png"), JobOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::Storage(_)));
        assert_eq!(h.repo.len(), 0);
        assert!(h.publisher.sent().is_empty());
    }

    #[tokio::test]
    async fn persistence_failure_publishes_nothing() {
        let h = Harness::new();
        h.repo.fail_writes(true);

        let err = h
            .service
            .create_job(upload("photo.png", b"png"), JobOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::Repository(_)));
        assert!(h.publisher.sent().is_empty());
        assert!(h.storage.is_empty(), "orphaned input blob should be removed");
    }

    #[tokio::test]
    async fn publish_failure_leaves_job_queued() {
        let h = Harness::new();
        h.publisher.fail(true);

        let created = h
            .service
            .create_job(upload("photo.png", b"png"), JobOptions::default())
            .await
            .unwrap();

        assert!(!created.dispatched);
        let stored = h.repo.get(created.job.id).unwrap();
        assert_eq!(stored.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn get_job_reports_missing() {
        let h = Harness::new();
        let id = Uuid::new_v4();
        assert!(matches!(h.service.get_job(id).await, Err(JobError::NotFound(missing)) if missing == id));
    }

    #[tokio::test]
    async fn completed_callback_transitions_queued_job() {
        let h = Harness::new();
        let job = queued(&h).await;

        let ack = h
            .service
            .apply_callback(WorkerCallback::completed(job.id, "processed/x/output.jpg"))
            .await
            .unwrap();

        let CallbackAck::Applied(done) = ack else {
            panic!("expected the callback to apply");
        };
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.processed_file_key.as_deref(), Some("processed/x/output.jpg"));
        assert!(done.completed_at.is_some());
        assert!(done.error_message.is_none());
    }

    #[tokio::test]
    async fn completed_callback_transitions_processing_job() {
        let h = Harness::new();
        let job = queued(&h).await;
        let processing = h.service.mark_processing(job.id).await.unwrap();
        assert_eq!(processing.status, JobStatus::Processing);

        let ack = h
            .service
            .apply_callback(WorkerCallback::completed(job.id, "processed/key"))
            .await
            .unwrap();
        assert_eq!(ack.job().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn duplicate_completed_callback_is_a_no_op() {
        let h = Harness::new();
        let job = queued(&h).await;
        let callback = WorkerCallback::completed(job.id, "processed/key");

        h.service.apply_callback(callback.clone()).await.unwrap();
        let before = h.repo.get(job.id).unwrap();

        let ack = h.service.apply_callback(callback).await.unwrap();
        assert!(matches!(ack, CallbackAck::AlreadyApplied(_)));
        assert_eq!(h.repo.get(job.id).unwrap(), before);
    }

    #[tokio::test]
    async fn failed_after_completed_is_rejected() {
        let h = Harness::new();
        let job = queued(&h).await;
        h.service
            .apply_callback(WorkerCallback::completed(job.id, "processed/key"))
            .await
            .unwrap();

        let err = h
            .service
            .apply_callback(WorkerCallback::failed(job.id, "late failure"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            JobError::ConflictingCallback {
                current: JobStatus::Completed,
                reported: JobStatus::Failed,
                ..
            }
        ));
        let stored = h.repo.get(job.id).unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.processed_file_key.as_deref(), Some("processed/key"));
        assert!(stored.error_message.is_none());
    }

    #[tokio::test]
    async fn completed_with_different_key_conflicts() {
        let h = Harness::new();
        let job = queued(&h).await;
        h.service
            .apply_callback(WorkerCallback::completed(job.id, "processed/a"))
            .await
            .unwrap();

        let err = h
            .service
            .apply_callback(WorkerCallback::completed(job.id, "processed/b"))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::ConflictingCallback { .. }));
    }

    #[tokio::test]
    async fn failed_callback_records_message() {
        let h = Harness::new();
        let job = queued(&h).await;

        h.service
            .apply_callback(WorkerCallback::failed(job.id, "decode error"))
            .await
            .unwrap();

        let stored = h.service.get_job(job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("decode error"));
        assert!(stored.processed_file_key.is_none());
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn failed_callback_without_message_gets_default() {
        let h = Harness::new();
        let job = queued(&h).await;

        let mut callback = WorkerCallback::failed(job.id, "");
        callback.error_message = None;
        let ack = h.service.apply_callback(callback).await.unwrap();

        assert_eq!(ack.job().error_message.as_deref(), Some(DEFAULT_FAILURE_MESSAGE));
    }

    #[tokio::test]
    async fn repeated_failure_is_a_no_op() {
        let h = Harness::new();
        let job = queued(&h).await;
        h.service
            .apply_callback(WorkerCallback::failed(job.id, "first"))
            .await
            .unwrap();

        let ack = h
            .service
            .apply_callback(WorkerCallback::failed(job.id, "second"))
            .await
            .unwrap();
        assert!(matches!(ack, CallbackAck::AlreadyApplied(_)));
        assert_eq!(ack.job().error_message.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn callback_validation() {
        let h = Harness::new();
        let job = queued(&h).await;

        let mut unknown = WorkerCallback::completed(job.id, "k");
        unknown.status = "processing".into();
        assert!(matches!(
            h.service.apply_callback(unknown).await,
            Err(JobError::InvalidCallback(_))
        ));

        let mut missing_key = WorkerCallback::completed(job.id, "k");
        missing_key.processed_file_key = None;
        assert!(matches!(
            h.service.apply_callback(missing_key).await,
            Err(JobError::InvalidCallback(_))
        ));

        let mut bad_id = WorkerCallback::completed(job.id, "k");
        bad_id.job_id = "not-a-uuid".into();
        assert!(matches!(
            h.service.apply_callback(bad_id).await,
            Err(JobError::InvalidCallback(_))
        ));

        assert_eq!(h.repo.get(job.id).unwrap().status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn callback_for_unknown_job_creates_nothing() {
        let h = Harness::new();
        let existing = queued(&h).await;
        let snapshot = h.repo.get(existing.id).unwrap();

        let err = h
            .service
            .apply_callback(WorkerCallback::completed(Uuid::new_v4(), "processed/key"))
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::NotFound(_)));
        assert_eq!(h.repo.len(), 1);
        assert_eq!(h.repo.get(existing.id).unwrap(), snapshot);
    }

    #[tokio::test]
    async fn concurrent_conflicting_callbacks_have_one_winner() {
        let h = Harness::new();
        let job = queued(&h).await;

        let completed = h
            .service
            .apply_callback(WorkerCallback::completed(job.id, "processed/key"));
        let failed = h.service.apply_callback(WorkerCallback::failed(job.id, "boom"));
        let (a, b) = tokio::join!(completed, failed);

        assert!(a.is_ok() != b.is_ok(), "exactly one callback must win");
        let stored = h.repo.get(job.id).unwrap();
        assert!(stored.status.is_terminal());
        assert_eq!(stored.processed_file_key.is_some(), stored.status == JobStatus::Completed);
        assert_eq!(stored.error_message.is_some(), stored.status == JobStatus::Failed);
    }

    #[tokio::test]
    async fn callback_losing_the_write_race_resolves_against_the_winner() {
        let h = Harness::new();
        let job = queued(&h).await;
        let before = h.repo.get(job.id).unwrap();

        h.service
            .apply_callback(WorkerCallback::completed(job.id, "processed/key"))
            .await
            .unwrap();

        // Same outcome: the read still sees QUEUED, the conditional write loses.
        h.repo.serve_stale_read(before.clone());
        let ack = h
            .service
            .apply_callback(WorkerCallback::completed(job.id, "processed/key"))
            .await
            .unwrap();
        assert!(matches!(ack, CallbackAck::AlreadyApplied(_)));
        assert_eq!(ack.job().status, JobStatus::Completed);

        // Different outcome through the same path.
        h.repo.serve_stale_read(before);
        let err = h
            .service
            .apply_callback(WorkerCallback::failed(job.id, "late"))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::ConflictingCallback { .. }));

        let stored = h.repo.get(job.id).unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.processed_file_key.as_deref(), Some("processed/key"));
        assert!(stored.error_message.is_none());
    }

    #[tokio::test]
    async fn operator_fail_losing_the_write_race_is_a_conflict() {
        let h = Harness::new();
        let job = queued(&h).await;
        let before = h.repo.get(job.id).unwrap();
        h.service
            .apply_callback(WorkerCallback::completed(job.id, "processed/key"))
            .await
            .unwrap();

        h.repo.serve_stale_read(before);
        let err = h.service.fail_job(job.id, "stuck").await.unwrap_err();
        assert!(matches!(err, JobError::InvalidTransition { .. }));
        assert_eq!(h.repo.get(job.id).unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn queued_jobs_come_back_oldest_first() {
        let h = Harness::new();
        let now = OffsetDateTime::now_utc();
        // Insert out of order on purpose.
        for offset in [5, 1, 3, 2, 4] {
            h.repo
                .seed(h.new_job(now - time::Duration::seconds(offset), JobStatus::Queued));
        }
        h.repo
            .seed(h.new_job(now - time::Duration::seconds(10), JobStatus::Failed));

        let queued = h.service.get_queued_jobs().await.unwrap();
        assert_eq!(queued.len(), 5);
        assert!(queued.windows(2).all(|w| w[0].created_at <= w[1].created_at));
        assert!(queued.iter().all(|j| j.status == JobStatus::Queued));
    }

    #[tokio::test]
    async fn mark_processing_never_moves_backwards() {
        let h = Harness::new();
        let job = queued(&h).await;
        h.service
            .apply_callback(WorkerCallback::completed(job.id, "processed/key"))
            .await
            .unwrap();

        let after = h.service.mark_processing(job.id).await.unwrap();
        assert_eq!(after.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn delete_removes_record_and_optionally_blobs() {
        let h = Harness::new();
        let keep = queued(&h).await;
        let purge = queued(&h).await;

        h.service.delete_job(keep.id, false).await.unwrap();
        h.service.delete_job(purge.id, true).await.unwrap();

        assert!(h.repo.get(keep.id).is_none());
        assert!(h.storage.contains(&keep.original_file_key));
        assert!(!h.storage.contains(&purge.original_file_key));
        assert!(matches!(
            h.service.delete_job(keep.id, false).await,
            Err(JobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn redispatch_after_a_concurrent_finish_publishes_nothing() {
        let h = Harness::new();
        let job = queued(&h).await;
        let before = h.repo.get(job.id).unwrap();
        h.service
            .apply_callback(WorkerCallback::completed(job.id, "processed/key"))
            .await
            .unwrap();
        let sent = h.publisher.sent().len();

        h.repo.serve_stale_read(before);
        assert!(matches!(
            h.service.redispatch(job.id).await,
            Err(JobError::InvalidTransition { current: JobStatus::Completed, .. })
        ));
        assert_eq!(h.publisher.sent().len(), sent);
    }

    #[tokio::test]
    async fn redispatch_republishes_non_terminal_jobs_only() {
        let h = Harness::new();
        let job = queued(&h).await;

        h.service.redispatch(job.id).await.unwrap();
        assert_eq!(h.publisher.sent().len(), 2);

        h.service.fail_job(job.id, "stuck").await.unwrap();
        assert!(matches!(
            h.service.redispatch(job.id).await,
            Err(JobError::InvalidTransition { .. })
        ));
        assert!(matches!(
            h.service.fail_job(job.id, "again").await,
            Err(JobError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn stats_count_each_status() {
        let h = Harness::new();
        let a = queued(&h).await;
        queued(&h).await;
        h.service
            .apply_callback(WorkerCallback::failed(a.id, "x"))
            .await
            .unwrap();

        let stats = h.service.job_stats().await.unwrap();
        assert_eq!(stats.total_jobs, 2);
        assert_eq!(stats.queued_jobs, 1);
        assert_eq!(stats.failed_jobs, 1);
    }

    #[tokio::test]
    async fn blob_store_default_store_generates_keys() {
        let h = Harness::new();
        let key = h
            .storage
            .store("a.txt", Bytes::from_static(b"x"), "text/plain")
            .await
            .unwrap();
        assert!(key.ends_with("/a.txt"));
    }
}
