//! Async RabbitMQ client for enqueueing task envelopes.
//!
//! The client maintains a persistent connection and channel,
//! reconnecting lazily on failure. Enqueueing never blocks on task
//! completion; once the broker confirms the publish, at-least-once
//! delivery to some worker is guaranteed.

use std::sync::Arc;

use lapin::{
    options::{BasicPublishOptions, QueueDeclareOptions},
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::EnqueueError;
use crate::task::{TaskEnvelope, CLEANUP_QUEUE, EMAILS_QUEUE};

/// Async RabbitMQ publisher with connection management.
#[derive(Clone)]
pub struct BrokerClient {
    inner: Arc<BrokerClientInner>,
}

struct BrokerClientInner {
    url: String,
    connection: RwLock<Option<Connection>>,
    channel: RwLock<Option<Channel>>,
}

impl BrokerClient {
    /// Create a new client with the given broker URL. No connection is
    /// made until the first enqueue.
    pub fn new(url: String) -> Self {
        Self {
            inner: Arc::new(BrokerClientInner {
                url,
                connection: RwLock::new(None),
                channel: RwLock::new(None),
            }),
        }
    }

    /// Ensure we have a valid connection and channel.
    async fn ensure_connected(&self) -> Result<Channel, EnqueueError> {
        // Check if we have a valid channel
        {
            let channel = self.inner.channel.read().await;
            if let Some(ch) = channel.as_ref() {
                if ch.status().connected() {
                    return Ok(ch.clone());
                }
            }
        }

        // Need to reconnect
        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        // Double-check after acquiring write lock
        if let Some(ch) = channel.as_ref() {
            if ch.status().connected() {
                return Ok(ch.clone());
            }
        }

        info!("rabbitmq_broker_connecting");

        let conn = Connection::connect(&self.inner.url, ConnectionProperties::default()).await?;

        info!("rabbitmq_broker_connected");

        let ch = conn.create_channel().await?;

        // Declare both task queues (idempotent operation)
        ch.queue_declare(
            EMAILS_QUEUE,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

        ch.queue_declare(
            CLEANUP_QUEUE,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await?;

        info!(
            emails_queue = EMAILS_QUEUE,
            cleanup_queue = CLEANUP_QUEUE,
            "rabbitmq_queues_declared"
        );

        *connection = Some(conn);
        *channel = Some(ch.clone());

        Ok(ch)
    }

    /// Append an envelope to its durable queue. Returns the task_id as
    /// soon as the broker confirms the publish.
    pub async fn enqueue(&self, envelope: &TaskEnvelope) -> Result<String, EnqueueError> {
        let channel = self.ensure_connected().await?;

        let body = serde_json::to_vec(envelope)?;

        channel
            .basic_publish(
                "",
                &envelope.queue,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default()
                    .with_delivery_mode(2) // Persistent
                    .with_content_type("application/json".into())
                    .with_message_id(envelope.task_id.clone().into()),
            )
            .await?
            .await?;

        info!(
            queue = %envelope.queue,
            task = %envelope.task_name,
            task_id = %envelope.task_id,
            attempt_count = envelope.attempt_count,
            body_length = body.len(),
            "task_enqueued"
        );

        Ok(envelope.task_id.clone())
    }

    /// Close the connection gracefully.
    pub async fn close(&self) {
        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        if let Some(ch) = channel.take() {
            if let Err(e) = ch.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_channel_close_error");
            }
        }

        if let Some(conn) = connection.take() {
            if let Err(e) = conn.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_connection_close_error");
            }
        }

        info!("rabbitmq_broker_closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_client_creation() {
        let client = BrokerClient::new("amqp://localhost:5672".to_string());
        // Just verify it can be created without touching the network
        assert!(Arc::strong_count(&client.inner) == 1);
    }
}
