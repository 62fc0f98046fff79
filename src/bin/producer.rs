//! Publish users from a CSV file to the queue.
//!
//! Usage:
//!   producer --filepath ./users.csv

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use user_pipeline::queue::amqp::AmqpQueue;
use user_pipeline::queue::{QueueOptions, QueueService};
use user_pipeline::{Producer, ProducerConfig};

#[derive(Parser, Debug)]
#[command(name = "producer")]
#[command(about = "Publish user records from a CSV file to RabbitMQ")]
struct Args {
    /// Headerless CSV: id,first_name,last_name,email,created_at,deleted_at,merged_at,parent_user_id
    #[arg(long, default_value = "./users.csv")]
    filepath: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ProducerConfig::from_env().context("loading configuration")?;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let queue = AmqpQueue::connect(&config.amqp_url)
        .await
        .context("connecting to RabbitMQ")?;
    let queue_name = queue
        .declare_queue(&config.queue_name, QueueOptions::default())
        .await
        .context("declaring queue")?;
    let queue = Arc::new(queue);

    let producer = Producer::new(queue.clone(), config.producer_concurrency);
    let report = producer
        .publish_file(&args.filepath, &queue_name)
        .await
        .with_context(|| format!("publishing {}", args.filepath.display()))?;

    info!(
        queue = %queue_name,
        published = report.published,
        skipped = report.skipped,
        failed = report.failed,
        "Done"
    );

    if let Err(e) = queue.close().await {
        warn!(error = %e, "Closing broker connection failed");
    }
    Ok(())
}
