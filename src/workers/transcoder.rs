use bytes::Bytes;
use futures_util::StreamExt;
use lapin::options::{BasicAckOptions, BasicNackOptions};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::infrastructure::queue::rabbitmq::RabbitMqService;
use crate::infrastructure::storage::BlobStore;
use crate::modules::job::events::{DispatchMessage, WorkerCallback};
use crate::transcoding::{TranscodeRequest, Transcoder};

const CONSUMER_TAG: &str = "transcoder_worker";

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Input download failed: {0}")]
    Download(String),

    #[error("Callback delivery failed: {0}")]
    Callback(String),
}

/// What to tell the broker about a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Requeue,
}

/// Processes one dispatch message end to end: notify, download, transform,
/// store, report.
#[derive(Clone)]
pub struct TranscodeWorker {
    storage: Arc<dyn BlobStore>,
    transcoder: Arc<dyn Transcoder>,
    http: reqwest::Client,
    backend_url: String,
}

impl TranscodeWorker {
    pub fn new(
        storage: Arc<dyn BlobStore>,
        transcoder: Arc<dyn Transcoder>,
        http: reqwest::Client,
        backend_url: &str,
    ) -> Self {
        Self {
            storage,
            transcoder,
            http,
            backend_url: backend_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn handle(&self, payload: &[u8]) -> Disposition {
        let message = match serde_json::from_slice::<DispatchMessage>(payload) {
            Ok(message) => message,
            Err(e) => {
                error!("❌ Dropping unparseable dispatch message: {}", e);
                return Disposition::Ack;
            }
        };

        info!("📦 Received job {}", message.id);
        self.notify_processing(message.id).await;

        let callback = match self.process(&message).await {
            Ok(key) => {
                info!("✅ Job {} transcoded to {}", message.id, key);
                WorkerCallback::completed(message.id, key)
            }
            Err(reason) => {
                error!("❌ Job {} failed: {}", message.id, reason);
                WorkerCallback::failed(message.id, reason)
            }
        };

        match self.send_callback(&message.callback_url, &callback).await {
            Ok(()) => Disposition::Ack,
            Err(e) => {
                warn!("Requeueing job {}: {}", message.id, e);
                Disposition::Requeue
            }
        }
    }

    /// Returns the processed key, or the error text to report.
    async fn process(&self, message: &DispatchMessage) -> Result<String, String> {
        let request = TranscodeRequest::from_dispatch(message).map_err(|e| e.to_string())?;
        let input = self
            .download(&message.input_url)
            .await
            .map_err(|e| e.to_string())?;
        info!("⬇️ Downloaded {} bytes for job {}", input.len(), message.id);

        let output = self
            .transcoder
            .transform(input, &request)
            .await
            .map_err(|e| e.to_string())?;

        let key = output_key(message.id, request.format.extension());
        self.storage
            .put(&key, output, request.format.content_type())
            .await
            .map_err(|e| e.to_string())?;

        Ok(key)
    }

    async fn download(&self, url: &str) -> Result<Bytes, WorkerError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| WorkerError::Download(e.to_string()))?;

        response
            .bytes()
            .await
            .map_err(|e| WorkerError::Download(e.to_string()))
    }

    async fn notify_processing(&self, id: Uuid) {
        let url = format!("{}/api/v1/jobs/{}/processing", self.backend_url, id);
        match self.http.post(&url).send().await {
            Ok(r) if r.status().is_success() => {}
            Ok(r) => warn!("Processing notification for job {} answered {}", id, r.status()),
            Err(e) => warn!("Processing notification for job {} failed: {}", id, e),
        }
    }

    /// A 4xx answer is final (unknown job, conflicting outcome) and counts
    /// as delivered; transport errors and 5xx do not.
    async fn send_callback(&self, url: &str, callback: &WorkerCallback) -> Result<(), WorkerError> {
        let response = self
            .http
            .post(url)
            .json(callback)
            .send()
            .await
            .map_err(|e| WorkerError::Callback(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(WorkerError::Callback(format!("backend answered {}", status)));
        }
        if status.is_client_error() {
            warn!(
                "Callback for job {} rejected with {}; not retrying",
                callback.job_id, status
            );
        }
        Ok(())
    }
}

pub fn output_key(id: Uuid, extension: &str) -> String {
    format!("processed/{}/output.{}", id, extension)
}

/// Consumes the dispatch queue one delivery at a time until `shutdown` flips.
pub async fn start_transcoder_worker(
    queue: &RabbitMqService,
    worker: TranscodeWorker,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    info!("🎥 Starting Transcoder Worker...");

    let mut consumer = queue.consume(CONSUMER_TAG, 1).await?;
    info!("🎥 Transcoder Worker listening on '{}'", queue.queue_name());

    loop {
        let delivery = tokio::select! {
            _ = shutdown.changed() => {
                info!("Transcoder Worker shutting down");
                break;
            }
            next = consumer.next() => match next {
                Some(delivery) => delivery,
                None => {
                    warn!("Consumer stream ended");
                    break;
                }
            },
        };

        let delivery = match delivery {
            Ok(delivery) => delivery,
            Err(e) => {
                error!("Failed to receive delivery: {}", e);
                continue;
            }
        };

        let result = match worker.handle(&delivery.data).await {
            Disposition::Ack => delivery.ack(BasicAckOptions::default()).await,
            Disposition::Requeue => {
                delivery
                    .nack(BasicNackOptions {
                        requeue: true,
                        ..BasicNackOptions::default()
                    })
                    .await
            }
        };

        if let Err(e) = result {
            error!("Failed to settle delivery: {}", e);
        }
    }

    Ok(())
}
