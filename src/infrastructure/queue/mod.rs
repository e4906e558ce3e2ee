use async_trait::async_trait;
use thiserror::Error;

use crate::modules::job::events::DispatchMessage;

pub mod rabbitmq;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Consume failed: {0}")]
    ConsumeFailed(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Hands dispatch messages to the durable work queue.
#[async_trait]
pub trait JobPublisher: Send + Sync {
    async fn publish(&self, message: &DispatchMessage) -> QueueResult<()>;
}
