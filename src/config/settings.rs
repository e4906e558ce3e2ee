use serde::Deserialize;
use std::time::Duration;

use crate::config::env::{self, EnvKey};

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    pub server_port: u16,
    pub database_url: String,
    pub rabbitmq_url: String,
    pub queue_name: String,
    pub minio_url: String,
    pub minio_bucket: String,
    pub minio_access_key: String,
    pub minio_secret_key: String,
    pub callback_url: String,
    pub backend_url: String,
    pub default_output_format: String,
    pub signed_url_ttl_secs: u64,
    pub max_upload_bytes: usize,
    pub stale_job_seconds: i64,
    pub stuck_job_seconds: i64,
    pub sweep_schedule: String,
    pub sweep_batch_size: i64,
    pub ffmpeg_path: String,
}

impl AppConfig {
    pub fn new() -> Result<Self, std::env::VarError> {
        let server_port = env::get_parsed(EnvKey::ServerPort, 8080);
        let backend_url = env::get_or(
            EnvKey::BackendUrl,
            &format!("http://localhost:{}", server_port),
        );
        let callback_url = env::get_or(
            EnvKey::CallbackUrl,
            &format!("{}/api/v1/jobs/worker-callback", backend_url.trim_end_matches('/')),
        );

        Ok(Self {
            server_port,
            database_url: env::get(EnvKey::DatabaseUrl)?,
            rabbitmq_url: env::get(EnvKey::RabbitMqUrl)?,
            queue_name: env::get_or(EnvKey::QueueName, "media_jobs"),
            minio_url: env::get(EnvKey::MinioUrl)?,
            minio_bucket: env::get(EnvKey::MinioBucket)?,
            minio_access_key: env::get(EnvKey::MinioAccessKey)?,
            minio_secret_key: env::get(EnvKey::MinioSecretKey)?,
            callback_url,
            backend_url,
            default_output_format: env::get_or(EnvKey::DefaultOutputFormat, "mp4"),
            signed_url_ttl_secs: env::get_parsed(EnvKey::SignedUrlTtlSecs, 7 * 24 * 60 * 60),
            max_upload_bytes: env::get_parsed(EnvKey::MaxUploadBytes, 512 * 1024 * 1024),
            stale_job_seconds: env::get_parsed(EnvKey::StaleJobSeconds, 15 * 60),
            stuck_job_seconds: env::get_parsed(EnvKey::StuckJobSeconds, 60 * 60),
            sweep_schedule: env::get_or(EnvKey::SweepSchedule, "0 */5 * * * *"),
            sweep_batch_size: env::get_parsed(EnvKey::SweepBatchSize, 100),
            ffmpeg_path: env::get_or(EnvKey::FfmpegPath, "ffmpeg"),
        })
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            callback_url: self.callback_url.clone(),
            default_output_format: self.default_output_format.clone(),
            signed_url_ttl: Duration::from_secs(self.signed_url_ttl_secs),
        }
    }
}

/// Settings the job orchestrator needs when building dispatch messages.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub callback_url: String,
    pub default_output_format: String,
    pub signed_url_ttl: Duration,
}
