use anyhow::Context;
use dotenvy::dotenv;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod app;
mod common;
mod config;
mod docs;
mod infrastructure;
mod modules;
mod routes;
mod state;
mod transcoding;
mod workers;

#[cfg(test)]
mod test_support;

use config::settings::AppConfig;
use infrastructure::db::pool::{DbPool, connect_to_db, run_migrations};
use infrastructure::queue::rabbitmq::RabbitMqService;
use infrastructure::storage::s3::S3Storage;
use modules::job::repository::PgJobRepository;
use modules::job::service::JobService;
use state::AppState;
use transcoding::ffmpeg::FfmpegTranscoder;
use workers::sweeper::{SweepPolicy, start_sweeper};
use workers::transcoder::{TranscodeWorker, start_transcoder_worker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Serve,
    Worker,
    Sweeper,
}

impl Mode {
    fn from_args() -> anyhow::Result<Self> {
        match std::env::args().nth(1).as_deref() {
            None | Some("serve") => Ok(Mode::Serve),
            Some("worker") => Ok(Mode::Worker),
            Some("sweeper") => Ok(Mode::Sweeper),
            Some(other) => anyhow::bail!("Unknown mode '{}', expected serve, worker or sweeper", other),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mode = Mode::from_args()?;
    let config = AppConfig::new().context("Missing required environment variable")?;

    match mode {
        Mode::Serve => serve(config).await,
        Mode::Worker => worker(config).await,
        Mode::Sweeper => sweeper(config).await,
    }
}

async fn storage(config: &AppConfig) -> S3Storage {
    S3Storage::new(
        &config.minio_url,
        &config.minio_bucket,
        &config.minio_access_key,
        &config.minio_secret_key,
    )
    .await
}

async fn database(config: &AppConfig) -> anyhow::Result<DbPool> {
    let db = connect_to_db(&config.database_url)
        .await
        .context("Failed to connect to PostgreSQL")?;
    run_migrations(&db).await.context("Failed to run migrations")?;
    Ok(db)
}

fn job_service(config: &AppConfig, db: DbPool, storage: S3Storage, queue: RabbitMqService) -> JobService {
    JobService::new(
        Arc::new(PgJobRepository::new(db)),
        Arc::new(storage),
        Arc::new(queue),
        config.pipeline(),
    )
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    info!("Starting server...");

    let db = database(&config).await?;
    let storage = storage(&config).await;
    let queue = RabbitMqService::new(&config.rabbitmq_url, &config.queue_name).await?;

    let jobs = job_service(&config, db, storage, queue.clone());
    let port = config.server_port;
    let state = AppState::new(config, jobs, reqwest::Client::new());
    let app = app::create_app(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    info!("Server running on http://0.0.0.0:{}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    queue.close().await;
    info!("Server stopped");
    Ok(())
}

async fn worker(config: AppConfig) -> anyhow::Result<()> {
    let storage = storage(&config).await;
    let queue = RabbitMqService::new(&config.rabbitmq_url, &config.queue_name).await?;

    let worker = TranscodeWorker::new(
        Arc::new(storage),
        Arc::new(FfmpegTranscoder::new(config.ffmpeg_path.clone())),
        reqwest::Client::new(),
        &config.backend_url,
    );

    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = tx.send(true);
    });

    let result = start_transcoder_worker(&queue, worker, rx).await;
    queue.close().await;
    result
}

async fn sweeper(config: AppConfig) -> anyhow::Result<()> {
    let db = database(&config).await?;
    let storage = storage(&config).await;
    let queue = RabbitMqService::new(&config.rabbitmq_url, &config.queue_name).await?;

    let policy = SweepPolicy::from_config(&config);
    let jobs = job_service(&config, db, storage, queue.clone());

    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = tx.send(true);
    });

    let result = start_sweeper(jobs, policy, &config.sweep_schedule, rx).await;
    queue.close().await;
    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
