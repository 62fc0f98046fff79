// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Queue → store pipeline.
//!
//! ```text
//!  set_qos(prefetch)           broker caps unacked deliveries
//!        │
//!  consume ──► fan-in loop ──► bounded mpsc (capacity = workers)
//!                 ▲                  │
//!          shutdown watch       ┌────┼────┐
//!                               ▼    ▼    ▼
//!                         workers: decode → to_entity → encrypt → create → ack
//!                                  any failure → reject(requeue)
//! ```
//!
//! Every delivery taken off the stream is settled exactly once: acked after a
//! successful insert, rejected with requeue otherwise. A delivery in hand when
//! shutdown is observed is rejected with requeue rather than dispatched.
//!
//! An ack failure is logged and not retried; the row is already persisted, so
//! a broker redelivery is preferred over losing data.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::crypto::{CryptoError, FieldEncryptor};
use crate::entity::to_entity;
use crate::metrics;
use crate::queue::{ConsumeOptions, Delivery, QueueError, QueueService};
use crate::record::{self, DecodeError};
use crate::storage::traits::{StorageError, UserStore};

/// Why a single delivery was rejected.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("encrypting email of record {record_id} failed: {source}")]
    Encrypt {
        record_id: i64,
        #[source]
        source: CryptoError,
    },
    #[error("persist failed: {0}")]
    Persist(#[from] StorageError),
}

/// Settlement counts for one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerReport {
    pub acked: u64,
    pub rejected: u64,
    /// Persisted, but the broker did not take the ack; it may redeliver.
    pub ack_failed: u64,
}

#[derive(Default)]
struct Counters {
    acked: AtomicU64,
    rejected: AtomicU64,
    ack_failed: AtomicU64,
}

pub struct Consumer {
    queue: Arc<dyn QueueService>,
    store: Arc<dyn UserStore>,
    encryptor: Arc<dyn FieldEncryptor>,
    config: PipelineConfig,
}

impl Consumer {
    pub fn new(
        queue: Arc<dyn QueueService>,
        store: Arc<dyn UserStore>,
        encryptor: Arc<dyn FieldEncryptor>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            queue,
            store,
            encryptor,
            config,
        }
    }

    /// Consume `queue_name` until `shutdown` turns true or the delivery
    /// stream ends, then wait for in-flight deliveries to settle.
    ///
    /// Returns an error if the subscription cannot be set up or the stream
    /// fails; per-delivery failures only show up in the report.
    #[tracing::instrument(skip(self, shutdown))]
    pub async fn run(
        &self,
        queue_name: &str,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<ConsumerReport, QueueError> {
        let workers = self.config.consumer_concurrency.max(1);

        self.queue.set_qos(self.config.prefetch_count).await?;
        let mut deliveries = self.queue.consume(queue_name, ConsumeOptions::default()).await?;
        info!(
            workers,
            prefetch = self.config.prefetch_count,
            "Consumer started"
        );

        let (tx, rx) = mpsc::channel::<Delivery>(workers);
        let rx = Arc::new(Mutex::new(rx));
        let counters = Arc::new(Counters::default());

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let rx = rx.clone();
            let store = self.store.clone();
            let encryptor = self.encryptor.clone();
            let counters = counters.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(delivery) = next else { break };
                    settle(worker, delivery, store.as_ref(), encryptor.as_ref(), &counters).await;
                }
                debug!(worker, "Worker drained");
            }));
        }

        let mut outcome = Ok(());
        loop {
            let next = tokio::select! {
                biased;
                _ = cancelled(&mut shutdown) => {
                    info!("Shutdown requested, no longer accepting deliveries");
                    break;
                }
                next = deliveries.next() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => {
                    error!(error = %e, "Delivery stream failed");
                    outcome = Err(e);
                    break;
                }
                None => {
                    info!("Delivery stream closed");
                    break;
                }
            };

            // a full channel blocks here until a worker frees a slot
            tokio::select! {
                biased;
                _ = cancelled(&mut shutdown) => {
                    let tag = delivery.delivery_tag;
                    if let Err(e) = delivery.reject(true).await {
                        warn!(delivery_tag = tag, error = %e, "Requeue on shutdown failed");
                    }
                    metrics::record_settled(false);
                    counters.rejected.fetch_add(1, Ordering::Relaxed);
                    info!("Shutdown requested, no longer accepting deliveries");
                    break;
                }
                permit = tx.reserve() => match permit {
                    Ok(permit) => permit.send(delivery),
                    Err(_) => {
                        error!("All consumer workers exited");
                        break;
                    }
                },
            }
        }

        drop(tx);
        drop(deliveries);
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Consumer worker panicked");
            }
        }

        let report = ConsumerReport {
            acked: counters.acked.load(Ordering::Relaxed),
            rejected: counters.rejected.load(Ordering::Relaxed),
            ack_failed: counters.ack_failed.load(Ordering::Relaxed),
        };
        info!(
            acked = report.acked,
            rejected = report.rejected,
            ack_failed = report.ack_failed,
            "Consumer stopped"
        );
        outcome.map(|()| report)
    }
}

/// Flip `shutdown` to true once `signal` resolves.
///
/// If the signal source itself fails, `shutdown` is held open forever so that
/// receivers keep running instead of observing a dropped sender.
pub async fn forward_shutdown<F>(signal: F, shutdown: watch::Sender<bool>)
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        error!(error = %e, "Cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
    let _ = shutdown.send(true);
}

/// Resolves once `shutdown` is true. Never resolves if the sender is gone
/// without having signalled.
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// decode → transform → encrypt → persist
async fn process(
    body: &[u8],
    store: &dyn UserStore,
    encryptor: &dyn FieldEncryptor,
) -> Result<i64, ProcessError> {
    let raw = record::decode(body)?;
    let record_id = raw.id;

    let mut user = to_entity(raw);
    user.email = encryptor
        .encrypt(&user.email)
        .map_err(|source| ProcessError::Encrypt { record_id, source })?;

    Ok(store.create_user(&user).await?)
}

async fn settle(
    worker: usize,
    delivery: Delivery,
    store: &dyn UserStore,
    encryptor: &dyn FieldEncryptor,
    counters: &Counters,
) {
    let tag = delivery.delivery_tag;
    let redelivered = delivery.redelivered;

    match process(&delivery.body, store, encryptor).await {
        Ok(id) => match delivery.ack().await {
            Ok(()) => {
                metrics::record_settled(true);
                counters.acked.fetch_add(1, Ordering::Relaxed);
                debug!(worker, delivery_tag = tag, user_id = id, "User persisted");
            }
            Err(e) => {
                metrics::record_ack_failed();
                counters.ack_failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    worker,
                    delivery_tag = tag,
                    user_id = id,
                    error = %e,
                    "Ack failed after persist; broker may redeliver"
                );
            }
        },
        Err(e) => {
            warn!(worker, delivery_tag = tag, redelivered, error = %e, "Rejecting delivery");
            metrics::record_settled(false);
            counters.rejected.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = delivery.reject(true).await {
                error!(worker, delivery_tag = tag, error = %e, "Reject failed");
            }
        }
    }
}
