//! AMQP publisher. One connection per publish, no pooling.

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tracing::debug;

use crate::error::QueueError;
use crate::queue::{QueueMessage, TaskQueue, USER_ID_HEADER};

/// Publishes to a named, non-durable, non-exclusive queue on the default exchange.
#[derive(Debug, Clone)]
pub struct AmqpQueue {
    url: String,
    queue_name: String,
}

impl AmqpQueue {
    pub fn new(url: impl Into<String>, queue_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            queue_name: queue_name.into(),
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    async fn publish_on(&self, channel: &Channel, message: &QueueMessage) -> Result<(), QueueError> {
        channel
            .queue_declare(
                &self.queue_name,
                QueueDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::Declare {
                queue: self.queue_name.clone(),
                reason: e.to_string(),
            })?;

        channel
            .basic_publish(
                "",
                &self.queue_name,
                BasicPublishOptions::default(),
                &message.body,
                properties(message),
            )
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?;

        Ok(())
    }
}

fn properties(message: &QueueMessage) -> BasicProperties {
    let mut headers = FieldTable::default();
    headers.insert(
        ShortString::from(USER_ID_HEADER),
        AMQPValue::LongString(LongString::from(message.user_id.clone())),
    );

    BasicProperties::default()
        .with_content_type(ShortString::from(message.content_type.clone()))
        .with_correlation_id(ShortString::from(message.correlation_id.clone()))
        .with_kind(ShortString::from(message.kind.clone()))
        .with_headers(headers)
}

#[async_trait]
impl TaskQueue for AmqpQueue {
    async fn publish(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let conn = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(|e| QueueError::Connect(e.to_string()))?;

        let result = match conn.create_channel().await {
            Ok(channel) => {
                let result = self.publish_on(&channel, message).await;
                let _ = channel.close(200, "OK").await;
                result
            }
            Err(e) => Err(QueueError::Channel(e.to_string())),
        };
        let _ = conn.close(200, "OK").await;

        if result.is_ok() {
            debug!(
                queue = %self.queue_name,
                correlation_id = %message.correlation_id,
                "Published task message"
            );
        }
        result
    }
}
