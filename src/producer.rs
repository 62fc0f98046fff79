//! File → queue pipeline.
//!
//! ```text
//!  CSV reader (blocking task)
//!        │  parse_row, skip bad rows
//!        ▼
//!  bounded mpsc (capacity = workers)   ← full channel stalls the reader
//!        │
//!   ┌────┼────┐
//!   ▼    ▼    ▼
//!  publish workers (N)  encode → publish(routing key = queue)
//! ```
//!
//! The call returns once the source is exhausted and every worker has drained
//! the channel. Per-record failures are logged and counted, never returned.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::metrics;
use crate::queue::{PublishMessage, QueueService};
use crate::record::{self, RawRecord};

#[derive(Error, Debug)]
pub enum ProducerError {
    #[error("Cannot open record source {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Reader task failed: {0}")]
    Reader(String),
}

/// Outcome counts for one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProducerReport {
    /// Rows parsed and handed to a worker.
    pub read: u64,
    /// Rows the CSV reader or the row parser rejected.
    pub skipped: u64,
    pub published: u64,
    pub failed: u64,
}

pub struct Producer {
    queue: Arc<dyn QueueService>,
    concurrency: usize,
}

impl Producer {
    /// `concurrency` is both the worker count and the hand-off capacity.
    pub fn new(queue: Arc<dyn QueueService>, concurrency: usize) -> Self {
        Self {
            queue,
            concurrency: concurrency.max(1),
        }
    }

    #[tracing::instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub async fn publish_file(
        &self,
        path: impl AsRef<Path>,
        queue_name: &str,
    ) -> Result<ProducerReport, ProducerError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| ProducerError::Open {
            path: path.display().to_string(),
            source: e,
        })?;
        self.publish_reader(file, queue_name).await
    }

    /// Publish every row of a headerless CSV source.
    pub async fn publish_reader<R>(
        &self,
        source: R,
        queue_name: &str,
    ) -> Result<ProducerReport, ProducerError>
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<RawRecord>(self.concurrency);
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(self.concurrency);
        for worker in 0..self.concurrency {
            let rx = rx.clone();
            let queue = self.queue.clone();
            let routing_key = queue_name.to_string();
            workers.push(tokio::spawn(async move {
                publish_worker(worker, rx, queue, routing_key).await
            }));
        }

        // tx moves into the reader; dropping it at EOF ends the workers' loops
        let reader = tokio::task::spawn_blocking(move || read_records(source, tx));

        let mut report = ProducerReport::default();
        match reader.await {
            Ok((read, skipped)) => {
                report.read = read;
                report.skipped = skipped;
            }
            Err(e) => warn!(error = %e, "Record reader terminated abnormally"),
        }

        for handle in workers {
            let (published, failed) = handle
                .await
                .map_err(|e| ProducerError::Reader(e.to_string()))?;
            report.published += published;
            report.failed += failed;
        }

        info!(
            read = report.read,
            skipped = report.skipped,
            published = report.published,
            failed = report.failed,
            "Producer finished"
        );
        Ok(report)
    }
}

fn read_records<R: Read>(source: R, tx: mpsc::Sender<RawRecord>) -> (u64, u64) {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(source);

    let (mut read, mut skipped) = (0u64, 0u64);
    for (line, row) in reader.records().enumerate() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                warn!(line = line + 1, error = %e, "Unreadable row, skipping");
                metrics::record_read(false);
                skipped += 1;
                continue;
            }
        };
        let fields: Vec<&str> = row.iter().collect();
        match record::parse_row(&fields) {
            Ok(raw) => {
                metrics::record_read(true);
                read += 1;
                if tx.blocking_send(raw).is_err() {
                    warn!("All publish workers exited, stopping reader");
                    break;
                }
            }
            Err(e) => {
                warn!(line = line + 1, error = %e, "Invalid row, skipping");
                metrics::record_read(false);
                skipped += 1;
            }
        }
    }
    (read, skipped)
}

async fn publish_worker(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<RawRecord>>>,
    queue: Arc<dyn QueueService>,
    routing_key: String,
) -> (u64, u64) {
    let (mut published, mut failed) = (0u64, 0u64);
    loop {
        let next = rx.lock().await.recv().await;
        let Some(raw) = next else { break };

        let payload = match record::encode(&raw) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(worker, record_id = raw.id, error = %e, "Encode failed");
                metrics::record_publish(false);
                failed += 1;
                continue;
            }
        };

        match queue.publish(PublishMessage::json(&routing_key, payload)).await {
            Ok(()) => {
                debug!(worker, record_id = raw.id, "Published");
                metrics::record_publish(true);
                published += 1;
            }
            Err(e) => {
                warn!(worker, record_id = raw.id, error = %e, "Publish failed");
                metrics::record_publish(false);
                failed += 1;
            }
        }
    }
    (published, failed)
}
