//! # User Pipeline
//!
//! Moves user records from a CSV file, through a message queue, into Postgres,
//! with the email field encrypted at rest and a cache-aside read API.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ Producer                     │  CSV rows → RawRecord → JSON
//! │ • sequential reader          │
//! │ • N publish workers          │
//! └──────────────────────────────┘
//!                │ AMQP (durable queue, routing key = queue name)
//!                ▼
//! ┌──────────────────────────────┐
//! │ Consumer                     │  prefetch caps unacked deliveries
//! │ • N workers: decode →        │
//! │   to_entity → encrypt →      │
//! │   insert → ack / reject      │
//! └──────────────────────────────┘
//!                │
//!                ▼
//! ┌──────────────────────────────┐      ┌─────────────────────┐
//! │ Postgres `users`             │ ◄──► │ Redis "entity:<id>" │
//! └──────────────────────────────┘      │ (no-op if absent)   │
//!                ▲                      └─────────────────────┘
//!                │                               ▲
//! ┌──────────────────────────────┐               │
//! │ UserService / HTTP           │───────────────┘
//! │ • GET /users/{id} (cached)   │
//! │ • GET /users (paginated)     │
//! └──────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`record`]: CSV row / queue payload codec
//! - [`entity`]: the persisted [`User`] and the raw → entity transform
//! - [`crypto`]: AES-CFB field cipher and Argon2 hashing
//! - [`queue`]: broker abstraction, RabbitMQ and in-memory backends
//! - [`storage`]: user store (Postgres, memory) and cache (Redis, memory, no-op)
//! - [`producer`] / [`consumer`]: the two pipelines
//! - [`service`] / [`http`]: the read path
//! - [`filter`] / [`pagination`]: listing query building
//! - [`resilience`]: retry with backoff
//! - [`config`]: environment-driven configuration

pub mod config;
pub mod consumer;
pub mod crypto;
pub mod entity;
pub mod filter;
pub mod http;
pub mod metrics;
pub mod pagination;
pub mod producer;
pub mod queue;
pub mod record;
pub mod resilience;
pub mod service;
pub mod storage;

pub use config::{ConsumerConfig, PipelineConfig, ProducerConfig};
pub use consumer::{Consumer, ConsumerReport};
pub use crypto::{CryptoError, FieldCipher, FieldEncryptor};
pub use entity::{to_entity, User};
pub use producer::{Producer, ProducerReport};
pub use queue::{Delivery, QueueError, QueueService};
pub use record::RawRecord;
pub use resilience::retry::RetryConfig;
pub use service::{ServiceError, UserService};
pub use storage::traits::{CacheStore, StorageError, UserStore};
