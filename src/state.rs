use crate::config::settings::AppConfig;
use crate::modules::job::service::JobService;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub jobs: JobService,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(config: AppConfig, jobs: JobService, http: reqwest::Client) -> Self {
        Self { config, jobs, http }
    }
}
