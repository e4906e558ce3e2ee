use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::download::proxy_download;
use super::dto::{CallbackResponse, DeleteJobQuery, FailJobRequest, ProxyQuery};
use super::events::WorkerCallback;
use super::model::{Job, JobStats, JobStatus};
use super::service::{CallbackAck, JobCreation};
use crate::common::response::{ApiError, ApiResponse, ApiSuccess};
use crate::common::upload::read_job_form;
use crate::state::AppState;

fn created(creation: JobCreation, message: &str) -> Response {
    if creation.dispatched {
        ApiSuccess(ApiResponse::success(creation.job, message), StatusCode::CREATED).into_response()
    } else {
        ApiSuccess(
            ApiResponse::success(creation.job, "Job created, dispatch deferred"),
            StatusCode::ACCEPTED,
        )
        .into_response()
    }
}

/// Submit a file for transcoding
#[utoipa::path(
    post,
    path = "/api/v1/jobs",
    request_body(content = String, content_type = "multipart/form-data",
        description = "Fields: file, outputFormat, outputQuality, settings[<key>]"),
    responses(
        (status = 201, description = "Job created and dispatched", body = ApiResponse<Job>),
        (status = 202, description = "Job created, dispatch deferred", body = ApiResponse<Job>),
        (status = 400, description = "Bad Request"),
        (status = 500, description = "Internal Server Error")
    ),
    tag = "Jobs"
)]
pub async fn create_job(State(state): State<AppState>, multipart: Multipart) -> Response {
    let (upload, options) = match read_job_form(multipart).await {
        Ok(form) => form,
        Err(e) => return e.into_response(),
    };

    info!("Received job request: filename={}", upload.filename);
    match state.jobs.create_job(upload, options).await {
        Ok(creation) => created(creation, "Job created successfully"),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Same form as `POST /jobs`. Missing `outputFormat`/`outputQuality` fall back to the
/// deployment defaults; `settings[<key>]` fields are honoured.
#[utoipa::path(
    post,
    path = "/api/v1/upload",
    request_body(content = String, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "File uploaded and job created", body = ApiResponse<Job>),
        (status = 202, description = "Job created, dispatch deferred", body = ApiResponse<Job>),
        (status = 400, description = "Bad Request"),
        (status = 500, description = "Internal Server Error")
    ),
    tag = "Jobs"
)]
pub async fn upload_file(State(state): State<AppState>, multipart: Multipart) -> Response {
    let (upload, options) = match read_job_form(multipart).await {
        Ok(form) => form,
        Err(e) => return e.into_response(),
    };

    info!("Received upload request: filename={}", upload.filename);
    match state.jobs.create_job(upload, options).await {
        Ok(creation) => created(creation, "File uploaded successfully"),
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/jobs/{id}",
    params(("id" = Uuid, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Get Job", body = ApiResponse<Job>),
        (status = 404, description = "Job Not Found")
    ),
    tag = "Jobs"
)]
pub async fn get_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match state.jobs.get_job(id).await {
        Ok(job) => ApiSuccess(ApiResponse::success(job, "Job retrieved successfully"), StatusCode::OK).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/jobs/status/{status}",
    params(("status" = String, Path, description = "QUEUED, PROCESSING, COMPLETED or FAILED")),
    responses(
        (status = 200, description = "Jobs in the given status, oldest first", body = ApiResponse<Vec<Job>>),
        (status = 400, description = "Unknown status")
    ),
    tag = "Jobs"
)]
pub async fn get_jobs_by_status(
    State(state): State<AppState>,
    Path(status): Path<String>,
) -> Response {
    let status = match status.parse::<JobStatus>() {
        Ok(status) => status,
        Err(e) => return ApiError::bad_request(e).into_response(),
    };

    match state.jobs.get_jobs_by_status(status).await {
        Ok(jobs) => ApiSuccess(ApiResponse::success(jobs, "Jobs retrieved successfully"), StatusCode::OK).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/jobs/queued",
    responses(
        (status = 200, description = "Queued jobs, oldest first", body = ApiResponse<Vec<Job>>)
    ),
    tag = "Jobs"
)]
pub async fn get_queued_jobs(State(state): State<AppState>) -> Response {
    match state.jobs.get_queued_jobs().await {
        Ok(jobs) => ApiSuccess(ApiResponse::success(jobs, "Queued jobs retrieved successfully"), StatusCode::OK).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/jobs/stats",
    responses(
        (status = 200, description = "Job counts per status", body = ApiResponse<JobStats>)
    ),
    tag = "Jobs"
)]
pub async fn job_stats(State(state): State<AppState>) -> Response {
    match state.jobs.job_stats().await {
        Ok(stats) => ApiSuccess(ApiResponse::success(stats, "Job statistics retrieved"), StatusCode::OK).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[utoipa::path(
    delete,
    path = "/api/v1/jobs/{id}",
    params(("id" = Uuid, Path, description = "Job ID"), DeleteJobQuery),
    responses(
        (status = 200, description = "Job deleted"),
        (status = 404, description = "Job Not Found")
    ),
    tag = "Jobs"
)]
pub async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<DeleteJobQuery>,
) -> Response {
    match state.jobs.delete_job(id, query.purge_files).await {
        Ok(()) => ApiSuccess(ApiResponse::success(id, "Job deleted successfully"), StatusCode::OK).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Download the processed artifact of a completed job
#[utoipa::path(
    get,
    path = "/api/v1/jobs/{id}/download",
    params(("id" = Uuid, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Processed file as an attachment"),
        (status = 404, description = "Job not found or not completed"),
        (status = 500, description = "Internal Server Error")
    ),
    tag = "Jobs"
)]
pub async fn download_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match state.jobs.resolve_download(id).await {
        Ok(download) => download.into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Relay a file from an http(s) URL as an attachment
#[utoipa::path(
    get,
    path = "/api/v1/jobs/download-proxy",
    params(ProxyQuery),
    responses(
        (status = 200, description = "Relayed file"),
        (status = 400, description = "Invalid URL"),
        (status = 502, description = "Upstream unreachable")
    ),
    tag = "Jobs"
)]
pub async fn download_proxy(
    State(state): State<AppState>,
    Query(query): Query<ProxyQuery>,
) -> Response {
    match proxy_download(&state.http, &query.url).await {
        Ok(proxied) => proxied.into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Worker outcome report. Replays of an applied outcome are acknowledged.
#[utoipa::path(
    post,
    path = "/api/v1/jobs/worker-callback",
    request_body = WorkerCallback,
    responses(
        (status = 200, description = "Callback applied or already applied", body = ApiResponse<CallbackResponse>),
        (status = 400, description = "Invalid callback"),
        (status = 404, description = "Job Not Found"),
        (status = 409, description = "Conflicts with the recorded outcome")
    ),
    tag = "Worker"
)]
pub async fn worker_callback(
    State(state): State<AppState>,
    Json(callback): Json<WorkerCallback>,
) -> Response {
    match state.jobs.apply_callback(callback).await {
        Ok(CallbackAck::Applied(job)) => ApiSuccess(
            ApiResponse::success(CallbackResponse { job, applied: true }, "Callback applied"),
            StatusCode::OK,
        )
        .into_response(),
        Ok(CallbackAck::AlreadyApplied(job)) => ApiSuccess(
            ApiResponse::success(CallbackResponse { job, applied: false }, "Callback already applied"),
            StatusCode::OK,
        )
        .into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/jobs/{id}/processing",
    params(("id" = Uuid, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Current job state", body = ApiResponse<Job>),
        (status = 404, description = "Job Not Found")
    ),
    tag = "Worker"
)]
pub async fn mark_processing(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match state.jobs.mark_processing(id).await {
        Ok(job) => ApiSuccess(ApiResponse::success(job, "Job processing"), StatusCode::OK).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/jobs/{id}/redispatch",
    params(("id" = Uuid, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Job re-dispatched", body = ApiResponse<Job>),
        (status = 404, description = "Job Not Found"),
        (status = 409, description = "Job already finished")
    ),
    tag = "Operations"
)]
pub async fn redispatch_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> Response {
    match state.jobs.redispatch(id).await {
        Ok(job) => ApiSuccess(ApiResponse::success(job, "Job re-dispatched"), StatusCode::OK).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/jobs/{id}/fail",
    params(("id" = Uuid, Path, description = "Job ID")),
    request_body = FailJobRequest,
    responses(
        (status = 200, description = "Job failed", body = ApiResponse<Job>),
        (status = 400, description = "Bad Request"),
        (status = 404, description = "Job Not Found"),
        (status = 409, description = "Job already finished")
    ),
    tag = "Operations"
)]
pub async fn fail_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<FailJobRequest>,
) -> Response {
    if let Err(e) = req.validate() {
        return ApiError::from(e).into_response();
    }

    match state.jobs.fail_job(id, &req.reason).await {
        Ok(job) => ApiSuccess(ApiResponse::success(job, "Job failed"), StatusCode::OK).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}
