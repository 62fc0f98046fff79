use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Broker connection error: {0}")]
    Connection(String),
    #[error("Channel operation failed: {0}")]
    Channel(String),
    #[error("Publish failed: {0}")]
    Publish(String),
    #[error("Broker did not confirm publish to '{0}'")]
    Nacked(String),
    #[error("Delivery stream error: {0}")]
    Consume(String),
    #[error("Acknowledgement failed: {0}")]
    Ack(String),
}

#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            durable: true,
            exclusive: false,
            auto_delete: false,
        }
    }
}

/// Subscription settings. Deliveries are always manually acknowledged.
#[derive(Debug, Clone, Default)]
pub struct ConsumeOptions {
    pub consumer_tag: String,
    pub exclusive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishMessage {
    /// Published on the default exchange, so this is the destination queue.
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub content_type: String,
}

impl PublishMessage {
    pub fn json(routing_key: &str, payload: Vec<u8>) -> Self {
        Self {
            routing_key: routing_key.to_string(),
            payload,
            content_type: "application/json".to_string(),
        }
    }
}

/// Settles deliveries with the broker, by tag.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self, delivery_tag: u64) -> Result<(), QueueError>;
    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), QueueError>;
}

/// One received message.
///
/// [`ack`](Self::ack) and [`reject`](Self::reject) take `self`, so a delivery
/// is settled at most once.
pub struct Delivery {
    pub body: Vec<u8>,
    pub delivery_tag: u64,
    pub redelivered: bool,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(
        body: Vec<u8>,
        delivery_tag: u64,
        redelivered: bool,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            body,
            delivery_tag,
            redelivered,
            acker,
        }
    }

    pub async fn ack(self) -> Result<(), QueueError> {
        self.acker.ack(self.delivery_tag).await
    }

    pub async fn reject(self, requeue: bool) -> Result<(), QueueError> {
        self.acker.reject(self.delivery_tag, requeue).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .field("body_len", &self.body.len())
            .finish()
    }
}

pub type DeliveryStream = BoxStream<'static, Result<Delivery, QueueError>>;

/// Broker operations the pipelines depend on.
#[async_trait]
pub trait QueueService: Send + Sync {
    /// Declare (or confirm) a queue and return its name.
    async fn declare_queue(&self, name: &str, options: QueueOptions) -> Result<String, QueueError>;

    /// Cap unacknowledged deliveries outstanding to this consumer.
    /// Must be called before [`consume`](Self::consume).
    async fn set_qos(&self, prefetch_count: u16) -> Result<(), QueueError>;

    async fn consume(
        &self,
        queue: &str,
        options: ConsumeOptions,
    ) -> Result<DeliveryStream, QueueError>;

    /// Publish and wait for the broker to confirm.
    async fn publish(&self, message: PublishMessage) -> Result<(), QueueError>;
}
