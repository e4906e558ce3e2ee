use std::env;
use std::str::FromStr;

pub enum EnvKey {
    ServerPort,
    DatabaseUrl,
    RabbitMqUrl,
    QueueName,
    MinioUrl,
    MinioBucket,
    MinioAccessKey,
    MinioSecretKey,
    CallbackUrl,
    BackendUrl,
    DefaultOutputFormat,
    SignedUrlTtlSecs,
    MaxUploadBytes,
    StaleJobSeconds,
    StuckJobSeconds,
    SweepSchedule,
    SweepBatchSize,
    FfmpegPath,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::ServerPort => "APP_PORT",
            EnvKey::DatabaseUrl => "DATABASE_URL",
            EnvKey::RabbitMqUrl => "RABBITMQ_URL",
            EnvKey::QueueName => "QUEUE_NAME",
            EnvKey::MinioUrl => "MINIO_ENDPOINT",
            EnvKey::MinioBucket => "MINIO_BUCKET",
            EnvKey::MinioAccessKey => "AWS_ACCESS_KEY_ID",
            EnvKey::MinioSecretKey => "AWS_SECRET_ACCESS_KEY",
            EnvKey::CallbackUrl => "CALLBACK_URL",
            EnvKey::BackendUrl => "BACKEND_URL",
            EnvKey::DefaultOutputFormat => "DEFAULT_OUTPUT_FORMAT",
            EnvKey::SignedUrlTtlSecs => "SIGNED_URL_TTL_SECS",
            EnvKey::MaxUploadBytes => "MAX_UPLOAD_BYTES",
            EnvKey::StaleJobSeconds => "STALE_JOB_SECONDS",
            EnvKey::StuckJobSeconds => "STUCK_JOB_SECONDS",
            EnvKey::SweepSchedule => "SWEEP_SCHEDULE",
            EnvKey::SweepBatchSize => "SWEEP_BATCH_SIZE",
            EnvKey::FfmpegPath => "FFMPEG_PATH",
        }
    }
}

pub fn get(key: EnvKey) -> Result<String, env::VarError> {
    env::var(key.as_str())
}

pub fn get_or(key: EnvKey, default: &str) -> String {
    env::var(key.as_str()).unwrap_or_else(|_| default.to_string())
}

pub fn get_parsed<T: FromStr>(key: EnvKey, default: T) -> T {
    match get(key) {
        Ok(val) => val.parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}
