use axum::Router;
use axum::routing::{get, post};

use crate::state::AppState;

pub mod download;
pub mod dto;
pub mod error;
pub mod events;
pub mod handler;
pub mod model;
pub mod repository;
pub mod service;

pub fn router() -> Router<AppState> {
    let jobs = Router::new()
        .route("/jobs", post(handler::create_job))
        .route("/jobs/queued", get(handler::get_queued_jobs))
        .route("/jobs/stats", get(handler::job_stats))
        .route("/jobs/status/{status}", get(handler::get_jobs_by_status))
        .route("/jobs/download-proxy", get(handler::download_proxy))
        .route("/jobs/{id}", get(handler::get_job).delete(handler::delete_job))
        .route("/jobs/{id}/download", get(handler::download_job))
        .route("/upload", post(handler::upload_file));

    let worker = Router::new()
        .route("/jobs/worker-callback", post(handler::worker_callback))
        .route("/jobs/{id}/processing", post(handler::mark_processing));

    let operations = Router::new()
        .route("/jobs/{id}/redispatch", post(handler::redispatch_job))
        .route("/jobs/{id}/fail", post(handler::fail_job));

    jobs.merge(worker).merge(operations)
}
