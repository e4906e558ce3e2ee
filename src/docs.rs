use utoipa::OpenApi;

use crate::modules::job::dto::{CallbackResponse, FailJobRequest};
use crate::modules::job::events::WorkerCallback;
use crate::modules::job::model::{Job, JobStats, JobStatus};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::modules::job::handler::create_job,
        crate::modules::job::handler::upload_file,
        crate::modules::job::handler::get_job,
        crate::modules::job::handler::get_jobs_by_status,
        crate::modules::job::handler::get_queued_jobs,
        crate::modules::job::handler::job_stats,
        crate::modules::job::handler::delete_job,
        crate::modules::job::handler::download_job,
        crate::modules::job::handler::download_proxy,
        crate::modules::job::handler::worker_callback,
        crate::modules::job::handler::mark_processing,
        crate::modules::job::handler::redispatch_job,
        crate::modules::job::handler::fail_job,
    ),
    components(
        schemas(Job, JobStatus, JobStats, WorkerCallback, FailJobRequest, CallbackResponse)
    ),
    tags(
        (name = "Jobs", description = "Transcoding job submission and retrieval"),
        (name = "Worker", description = "Endpoints called by transcoding workers"),
        (name = "Operations", description = "Manual recovery of stuck jobs")
    )
)]
pub struct ApiDoc;
