//! Message broker abstraction and backends.

pub mod amqp;
pub mod memory;
pub mod traits;

pub use traits::{
    Acknowledger, ConsumeOptions, Delivery, DeliveryStream, PublishMessage, QueueError,
    QueueOptions, QueueService,
};
