//! In-memory stand-ins for the job store, blob store, queue and transcoder.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::settings::{AppConfig, PipelineConfig};
use crate::infrastructure::queue::{JobPublisher, QueueError, QueueResult};
use crate::infrastructure::storage::{BlobStore, StorageError, StorageResult};
use crate::modules::job::events::DispatchMessage;
use crate::modules::job::model::{Job, JobOutcome, JobStatus, NewJob};
use crate::modules::job::repository::{JobRepository, RepositoryError, RepositoryResult};
use crate::modules::job::service::{JobService, JobUpload};
use crate::state::AppState;
use crate::transcoding::{TranscodeRequest, Transcoder, TransformError, TransformResult};

pub fn upload(filename: &str, data: &[u8]) -> JobUpload {
    JobUpload {
        filename: filename.to_string(),
        content_type: mime_guess::from_path(filename)
            .first_or_octet_stream()
            .to_string(),
        data: Bytes::copy_from_slice(data),
    }
}

pub fn pipeline_config() -> PipelineConfig {
    PipelineConfig {
        callback_url: "http://api.test/api/v1/jobs/worker-callback".to_string(),
        default_output_format: "mp4".to_string(),
        signed_url_ttl: Duration::from_secs(3600),
    }
}

pub struct Harness {
    pub service: JobService,
    pub repo: Arc<InMemoryJobRepository>,
    pub storage: Arc<InMemoryBlobStore>,
    pub publisher: Arc<RecordingPublisher>,
    pub config: PipelineConfig,
}

impl Harness {
    pub fn new() -> Self {
        let repo = Arc::new(InMemoryJobRepository::default());
        let storage = Arc::new(InMemoryBlobStore::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let config = pipeline_config();
        let service = JobService::new(
            repo.clone(),
            storage.clone(),
            publisher.clone(),
            config.clone(),
        );

        Self {
            service,
            repo,
            storage,
            publisher,
            config,
        }
    }

    /// A job record with the given creation time and status, not yet stored.
    pub fn new_job(&self, created_at: OffsetDateTime, status: JobStatus) -> Job {
        let mut job = NewJob {
            original_filename: "input.png".to_string(),
            original_file_key: format!("{}/input.png", Uuid::new_v4()),
            output_format: "jpg".to_string(),
            output_quality: "medium".to_string(),
            settings: HashMap::new(),
        }
        .into_job(created_at);
        job.status = status;
        match status {
            JobStatus::Completed => {
                job.processed_file_key = Some(format!("processed/{}/output.jpg", job.id));
                job.completed_at = Some(created_at);
            }
            JobStatus::Failed => {
                job.error_message = Some("Transcoding failed".to_string());
                job.completed_at = Some(created_at);
            }
            JobStatus::Queued | JobStatus::Processing => {}
        }
        job
    }

    /// Stores a fresh QUEUED job and returns its id.
    pub fn repo_seed_queued(&self) -> Uuid {
        let job = self.new_job(OffsetDateTime::now_utc(), JobStatus::Queued);
        let id = job.id;
        self.repo.seed(job);
        id
    }
}

pub fn app_config() -> AppConfig {
    AppConfig {
        server_port: 8080,
        database_url: "postgres://localhost/test".to_string(),
        rabbitmq_url: "amqp://localhost".to_string(),
        queue_name: "media_jobs".to_string(),
        minio_url: "http://localhost:9000".to_string(),
        minio_bucket: "media".to_string(),
        minio_access_key: "minio".to_string(),
        minio_secret_key: "minio123".to_string(),
        callback_url: "http://api.test/api/v1/jobs/worker-callback".to_string(),
        backend_url: "http://api.test".to_string(),
        default_output_format: "mp4".to_string(),
        signed_url_ttl_secs: 3600,
        max_upload_bytes: 16 * 1024 * 1024,
        stale_job_seconds: 900,
        stuck_job_seconds: 3600,
        sweep_schedule: "0 */5 * * * *".to_string(),
        sweep_batch_size: 100,
        ffmpeg_path: "ffmpeg".to_string(),
    }
}

pub fn app_state(harness: &Harness) -> AppState {
    AppState::new(app_config(), harness.service.clone(), reqwest::Client::new())
}

#[derive(Default)]
pub struct InMemoryJobRepository {
    jobs: Mutex<HashMap<Uuid, Job>>,
    stale_reads: Mutex<HashMap<Uuid, Job>>,
    fail_writes: AtomicBool,
}

impl InMemoryJobRepository {
    pub fn seed(&self, job: Job) {
        self.jobs.lock().unwrap().insert(job.id, job);
    }

    pub fn get(&self, id: Uuid) -> Option<Job> {
        self.jobs.lock().unwrap().get(&id).cloned()
    }

    /// The next `find_by_id` for `job.id` returns this snapshot instead of the
    /// stored row, as if another writer committed right after the read.
    pub fn serve_stale_read(&self, job: Job) {
        self.stale_reads.lock().unwrap().insert(job.id, job);
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> RepositoryResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }

    fn sorted(mut jobs: Vec<Job>) -> Vec<Job> {
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        jobs
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn insert(&self, job: &Job) -> RepositoryResult<Job> {
        self.check_writable()?;
        self.jobs.lock().unwrap().insert(job.id, job.clone());
        Ok(job.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Option<Job>> {
        if let Some(snapshot) = self.stale_reads.lock().unwrap().remove(&id) {
            return Ok(Some(snapshot));
        }
        Ok(self.get(id))
    }

    async fn list_by_status(&self, status: JobStatus) -> RepositoryResult<Vec<Job>> {
        let jobs = self.jobs.lock().unwrap();
        Ok(Self::sorted(
            jobs.values().filter(|j| j.status == status).cloned().collect(),
        ))
    }

    async fn list_stale(
        &self,
        status: JobStatus,
        before: OffsetDateTime,
        limit: i64,
    ) -> RepositoryResult<Vec<Job>> {
        let jobs = self.jobs.lock().unwrap();
        let stale = jobs
            .values()
            .filter(|j| j.status == status && j.updated_at < before)
            .cloned()
            .collect();
        Ok(Self::sorted(stale)
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(0))
            .collect())
    }

    async fn count_by_status(&self) -> RepositoryResult<Vec<(JobStatus, i64)>> {
        let jobs = self.jobs.lock().unwrap();
        let mut counts: HashMap<JobStatus, i64> = HashMap::new();
        for job in jobs.values() {
            *counts.entry(job.status).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }

    async fn delete(&self, id: Uuid) -> RepositoryResult<bool> {
        self.check_writable()?;
        Ok(self.jobs.lock().unwrap().remove(&id).is_some())
    }

    async fn mark_processing(&self, id: Uuid) -> RepositoryResult<Option<Job>> {
        self.check_writable()?;
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Queued => {
                job.status = JobStatus::Processing;
                job.updated_at = OffsetDateTime::now_utc();
                Ok(Some(job.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn finish(&self, id: Uuid, outcome: &JobOutcome) -> RepositoryResult<Option<Job>> {
        self.check_writable()?;
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(&id) {
            Some(job) if !job.status.is_terminal() => {
                job.finish(outcome, OffsetDateTime::now_utc());
                Ok(Some(job.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn touch(&self, id: Uuid, status: JobStatus) -> RepositoryResult<bool> {
        self.check_writable()?;
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(&id) {
            Some(job) if job.status == status => {
                job.updated_at = OffsetDateTime::now_utc();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct InMemoryBlobStore {
    objects: Mutex<HashMap<String, (Bytes, String)>>,
    fail_writes: AtomicBool,
}

impl InMemoryBlobStore {
    pub fn insert(&self, key: &str, data: &[u8]) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            (Bytes::copy_from_slice(data), "application/octet-stream".to_string()),
        );
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn object(&self, key: &str) -> Option<(Bytes, String)> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().unwrap().is_empty()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::upload_failed("injected failure"));
        }
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (data, content_type.to_string()));
        Ok(())
    }

    async fn fetch(&self, key: &str) -> StorageResult<Bytes> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| StorageError::not_found(key))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn sign_url(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        Ok(format!(
            "http://blobs.test/{}?expires={}",
            key,
            expires_in.as_secs()
        ))
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    sent: Mutex<Vec<DispatchMessage>>,
    fail: AtomicBool,
}

impl RecordingPublisher {
    pub fn sent(&self) -> Vec<DispatchMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobPublisher for RecordingPublisher {
    async fn publish(&self, message: &DispatchMessage) -> QueueResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(QueueError::PublishFailed("broker unavailable".to_string()));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// Echoes the input with a marker, or fails with a canned ffmpeg error.
#[derive(Default)]
pub struct FakeTranscoder {
    pub failure: Option<String>,
    requests: Mutex<Vec<TranscodeRequest>>,
}

impl FakeTranscoder {
    pub fn failing(stderr: &str) -> Self {
        Self {
            failure: Some(stderr.to_string()),
            requests: Mutex::default(),
        }
    }

    pub fn requests(&self) -> Vec<TranscodeRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn transform(&self, input: Bytes, request: &TranscodeRequest) -> TransformResult<Bytes> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(stderr) = &self.failure {
            return Err(TransformError::Ffmpeg {
                exit_code: Some(1),
                stderr: stderr.clone(),
            });
        }
        let mut out = b"transcoded:".to_vec();
        out.extend_from_slice(&input);
        Ok(Bytes::from(out))
    }
}
