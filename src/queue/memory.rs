//! Single-queue, in-process broker.
//!
//! Published messages are recorded and become deliveries on the same queue,
//! so a producer and a consumer can be wired back to back. Every settlement
//! is recorded per delivery tag for inspection.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::traits::{
    Acknowledger, ConsumeOptions, Delivery, DeliveryStream, PublishMessage, QueueError,
    QueueOptions, QueueService,
};

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    Rejected { requeue: bool },
}

/// Broker calls in the order they were made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    Declare(String),
    Qos(u16),
    Consume(String),
}

struct PendingDelivery {
    body: Vec<u8>,
    tag: u64,
    redelivered: bool,
}

struct State {
    events: Mutex<Vec<QueueEvent>>,
    published: Mutex<Vec<PublishMessage>>,
    settlements: DashMap<u64, Settlement>,
    sender: Mutex<Option<mpsc::UnboundedSender<PendingDelivery>>>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<PendingDelivery>>>,
    next_tag: AtomicU64,
    fail_publish: AtomicBool,
    fail_ack: AtomicBool,
}

#[derive(Clone)]
pub struct InMemoryQueue {
    state: Arc<State>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(State {
                events: Mutex::new(Vec::new()),
                published: Mutex::new(Vec::new()),
                settlements: DashMap::new(),
                sender: Mutex::new(Some(tx)),
                receiver: Mutex::new(Some(rx)),
                next_tag: AtomicU64::new(1),
                fail_publish: AtomicBool::new(false),
                fail_ack: AtomicBool::new(false),
            }),
        }
    }

    /// Enqueue a delivery directly, bypassing publish. Returns its tag.
    pub fn push(&self, body: impl Into<Vec<u8>>) -> u64 {
        self.enqueue(body.into(), false)
    }

    /// Enqueue a delivery flagged as redelivered.
    pub fn push_redelivered(&self, body: impl Into<Vec<u8>>) -> u64 {
        self.enqueue(body.into(), true)
    }

    fn enqueue(&self, body: Vec<u8>, redelivered: bool) -> u64 {
        let tag = self.state.next_tag.fetch_add(1, Ordering::SeqCst);
        if let Some(tx) = self.state.sender.lock().as_ref() {
            // receiver lives in `state` until consumed; send only fails once the stream is dropped
            let _ = tx.send(PendingDelivery {
                body,
                tag,
                redelivered,
            });
        }
        tag
    }

    /// End the delivery stream once the queued deliveries are drained.
    pub fn close(&self) {
        self.state.sender.lock().take();
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.state.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_ack(&self, fail: bool) {
        self.state.fail_ack.store(fail, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<PublishMessage> {
        self.state.published.lock().clone()
    }

    pub fn events(&self) -> Vec<QueueEvent> {
        self.state.events.lock().clone()
    }

    pub fn settlement(&self, tag: u64) -> Option<Settlement> {
        self.state.settlements.get(&tag).map(|s| *s)
    }

    pub fn settlements(&self) -> Vec<(u64, Settlement)> {
        let mut all: Vec<_> = self
            .state
            .settlements
            .iter()
            .map(|e| (*e.key(), *e.value()))
            .collect();
        all.sort_by_key(|(tag, _)| *tag);
        all
    }

    pub fn acked_count(&self) -> usize {
        self.count(|s| s == Settlement::Acked)
    }

    pub fn rejected_count(&self) -> usize {
        self.count(|s| matches!(s, Settlement::Rejected { .. }))
    }

    fn count(&self, pred: impl Fn(Settlement) -> bool) -> usize {
        self.state.settlements.iter().filter(|e| pred(*e.value())).count()
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

struct MemoryAcker {
    state: Arc<State>,
}

impl MemoryAcker {
    fn settle(&self, tag: u64, settlement: Settlement) -> Result<(), QueueError> {
        if self.state.fail_ack.load(Ordering::SeqCst) {
            return Err(QueueError::Ack("channel closed".into()));
        }
        if self.state.settlements.insert(tag, settlement).is_some() {
            return Err(QueueError::Ack(format!("delivery {} already settled", tag)));
        }
        Ok(())
    }
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self, delivery_tag: u64) -> Result<(), QueueError> {
        self.settle(delivery_tag, Settlement::Acked)
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), QueueError> {
        self.settle(delivery_tag, Settlement::Rejected { requeue })
    }
}

#[async_trait]
impl QueueService for InMemoryQueue {
    async fn declare_queue(
        &self,
        name: &str,
        _options: QueueOptions,
    ) -> Result<String, QueueError> {
        self.state
            .events
            .lock()
            .push(QueueEvent::Declare(name.to_string()));
        Ok(name.to_string())
    }

    async fn set_qos(&self, prefetch_count: u16) -> Result<(), QueueError> {
        self.state.events.lock().push(QueueEvent::Qos(prefetch_count));
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        _options: ConsumeOptions,
    ) -> Result<DeliveryStream, QueueError> {
        let rx = self
            .state
            .receiver
            .lock()
            .take()
            .ok_or_else(|| QueueError::Channel("queue already has a consumer".into()))?;
        self.state.events.lock().push(QueueEvent::Consume(queue.to_string()));

        let state = self.state.clone();
        let deliveries = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|d| (d, rx))
        })
        .map(move |d| {
            Ok(Delivery::new(
                d.body,
                d.tag,
                d.redelivered,
                Box::new(MemoryAcker { state: state.clone() }),
            ))
        });
        Ok(deliveries.boxed())
    }

    async fn publish(&self, message: PublishMessage) -> Result<(), QueueError> {
        if self.state.fail_publish.load(Ordering::SeqCst) {
            return Err(QueueError::Publish("broker unavailable".into()));
        }
        let body = message.payload.clone();
        self.state.published.lock().push(message);
        self.enqueue(body, false);
        Ok(())
    }
}
