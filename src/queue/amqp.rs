//! RabbitMQ backend over `lapin`.
//!
//! One connection and one channel per process. The channel runs in publisher
//! confirm mode, so [`QueueService::publish`] resolves only once the broker
//! has taken the message.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{acker::Acker, BasicProperties, Channel, Connection, ConnectionProperties};
use tracing::{debug, info};

use super::traits::{
    Acknowledger, ConsumeOptions, Delivery, DeliveryStream, PublishMessage, QueueError,
    QueueOptions, QueueService,
};
use crate::resilience::retry::{retry, RetryConfig};

pub struct AmqpQueue {
    connection: Connection,
    channel: Channel,
}

impl AmqpQueue {
    /// Connect with startup-mode retry and open a confirming channel.
    pub async fn connect(url: &str) -> Result<Self, QueueError> {
        let connection = retry("amqp_connect", &RetryConfig::startup(), || async {
            Connection::connect(url, ConnectionProperties::default())
                .await
                .map_err(|e| QueueError::Connection(e.to_string()))
        })
        .await?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| QueueError::Channel(e.to_string()))?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| QueueError::Channel(e.to_string()))?;

        info!("Connected to AMQP broker");
        Ok(Self { connection, channel })
    }

    pub async fn close(&self) -> Result<(), QueueError> {
        self.channel
            .close(200, "bye")
            .await
            .map_err(|e| QueueError::Channel(e.to_string()))?;
        self.connection
            .close(200, "bye")
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))
    }
}

struct LapinAcker(Acker);

#[async_trait]
impl Acknowledger for LapinAcker {
    async fn ack(&self, _delivery_tag: u64) -> Result<(), QueueError> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| QueueError::Ack(e.to_string()))
    }

    async fn reject(&self, _delivery_tag: u64, requeue: bool) -> Result<(), QueueError> {
        self.0
            .nack(BasicNackOptions {
                multiple: false,
                requeue,
            })
            .await
            .map_err(|e| QueueError::Ack(e.to_string()))
    }
}

#[async_trait]
impl QueueService for AmqpQueue {
    async fn declare_queue(&self, name: &str, options: QueueOptions) -> Result<String, QueueError> {
        let queue = self
            .channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable: options.durable,
                    exclusive: options.exclusive,
                    auto_delete: options.auto_delete,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::Channel(e.to_string()))?;

        debug!(queue = %queue.name().as_str(), messages = queue.message_count(), "Queue declared");
        Ok(queue.name().as_str().to_string())
    }

    async fn set_qos(&self, prefetch_count: u16) -> Result<(), QueueError> {
        self.channel
            .basic_qos(prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| QueueError::Channel(e.to_string()))
    }

    async fn consume(
        &self,
        queue: &str,
        options: ConsumeOptions,
    ) -> Result<DeliveryStream, QueueError> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                &options.consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    exclusive: options.exclusive,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::Channel(e.to_string()))?;

        let stream = consumer.map(|item| {
            item.map(|d| {
                Delivery::new(
                    d.data,
                    d.delivery_tag,
                    d.redelivered,
                    Box::new(LapinAcker(d.acker)),
                )
            })
            .map_err(|e| QueueError::Consume(e.to_string()))
        });
        Ok(stream.boxed())
    }

    async fn publish(&self, message: PublishMessage) -> Result<(), QueueError> {
        let confirm = self
            .channel
            .basic_publish(
                "",
                &message.routing_key,
                BasicPublishOptions::default(),
                &message.payload,
                BasicProperties::default().with_content_type(message.content_type.as_str().into()),
            )
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?;

        if confirm.is_nack() {
            return Err(QueueError::Nacked(message.routing_key));
        }
        Ok(())
    }
}
