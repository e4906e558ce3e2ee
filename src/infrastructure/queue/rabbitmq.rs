use async_trait::async_trait;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer, options::*,
    types::FieldTable,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{JobPublisher, QueueError, QueueResult};
use crate::modules::job::events::DispatchMessage;

/// Process-wide RabbitMQ handle. Created once at startup, shared by clone,
/// closed on shutdown.
#[derive(Clone)]
pub struct RabbitMqService {
    url: String,
    queue: String,
    conn: Arc<Mutex<Connection>>,
    channel: Arc<Mutex<Channel>>,
}

impl RabbitMqService {
    async fn connect(url: &str) -> QueueResult<(Connection, Channel)> {
        info!("Connecting to RabbitMQ");
        let conn = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| QueueError::ConnectionFailed(format!("Failed to connect to RabbitMQ: {}", e)))?;

        let channel = conn
            .create_channel()
            .await
            .map_err(|e| QueueError::ConnectionFailed(format!("Failed to create channel: {}", e)))?;

        info!("✅ Connected to RabbitMQ");
        Ok((conn, channel))
    }

    pub async fn new(url: &str, queue: &str) -> QueueResult<Self> {
        let (conn, channel) = Self::connect(url).await?;

        Ok(Self {
            url: url.to_string(),
            queue: queue.to_string(),
            conn: Arc::new(Mutex::new(conn)),
            channel: Arc::new(Mutex::new(channel)),
        })
    }

    pub fn queue_name(&self) -> &str {
        &self.queue
    }

    async fn reconnect(&self) -> QueueResult<()> {
        warn!("RabbitMQ connection dropped, reconnecting...");
        let (conn, channel) = Self::connect(&self.url).await?;
        *self.conn.lock().await = conn;
        *self.channel.lock().await = channel;
        Ok(())
    }

    async fn declare(channel: &Channel, queue: &str) -> QueueResult<()> {
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::PublishFailed(format!("Failed to declare queue: {}", e)))?;

        Ok(())
    }

    async fn publish_internal(&self, payload: &[u8]) -> QueueResult<()> {
        let channel = self.channel.lock().await;

        Self::declare(&channel, &self.queue).await?;

        channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_delivery_mode(2) // persistent
                    .with_content_type(mime::APPLICATION_JSON.essence_str().into()),
            )
            .await
            .map_err(|e| QueueError::PublishFailed(format!("Failed to publish message: {}", e)))?
            .await
            .map_err(|e| QueueError::PublishFailed(format!("Failed to confirm publication: {}", e)))?;

        Ok(())
    }

    async fn publish_bytes(&self, payload: &[u8]) -> QueueResult<()> {
        if let Err(e) = self.publish_internal(payload).await {
            warn!("RabbitMQ publish failed: {}. Retrying after reconnect.", e);
            self.reconnect().await?;
            self.publish_internal(payload).await?;
        }

        Ok(())
    }

    /// Declares the work queue and starts a consumer that receives at most
    /// `prefetch` unacknowledged deliveries at a time.
    pub async fn consume(&self, consumer_tag: &str, prefetch: u16) -> QueueResult<Consumer> {
        let channel = self.channel.lock().await;

        Self::declare(&channel, &self.queue).await?;

        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| QueueError::ConsumeFailed(format!("Failed to set prefetch: {}", e)))?;

        channel
            .basic_consume(
                &self.queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::ConsumeFailed(format!("Failed to create consumer: {}", e)))
    }

    pub async fn close(&self) {
        let conn = self.conn.lock().await;
        if let Err(e) = conn.close(200, "shutdown").await {
            warn!("RabbitMQ close failed: {}", e);
        } else {
            info!("RabbitMQ connection closed");
        }
    }
}

#[async_trait]
impl JobPublisher for RabbitMqService {
    async fn publish(&self, message: &DispatchMessage) -> QueueResult<()> {
        let payload = serde_json::to_vec(message)?;
        self.publish_bytes(&payload).await?;
        debug!("Dispatched job {} to '{}'", message.id, self.queue);
        Ok(())
    }
}
