//! HTTP read API, plus the queue consumer when `--consume` is given.
//!
//! Ctrl-C stops the consumer from taking new deliveries, lets in-flight ones
//! settle and shuts the HTTP server down.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use user_pipeline::http::build_router;
use user_pipeline::queue::amqp::AmqpQueue;
use user_pipeline::queue::{QueueOptions, QueueService};
use user_pipeline::storage::sql::SqlUserStore;
use user_pipeline::storage::{connect_cache, CACHE_CONNECT_TIMEOUT};
use user_pipeline::consumer::forward_shutdown;
use user_pipeline::{Consumer, ConsumerConfig, FieldCipher, UserService};

#[derive(Parser, Debug)]
#[command(name = "consumer")]
#[command(about = "Serve the user API and optionally consume the ingestion queue")]
struct Args {
    /// Also run the queue consumer pipeline
    #[arg(long)]
    consume: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ConsumerConfig::from_env().context("loading configuration")?;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
    info!(?config, consume = args.consume, "Starting");

    let cipher = Arc::new(
        FieldCipher::new(config.encryption_key.as_bytes()).context("invalid ENCRYPTION_KEY")?,
    );
    let store = Arc::new(
        SqlUserStore::connect(&config.database_url, config.max_connections)
            .await
            .context("connecting to Postgres")?,
    );
    let cache = connect_cache(Some(config.redis_url.as_str()), CACHE_CONNECT_TIMEOUT).await;
    let service = Arc::new(UserService::new(
        store.clone(),
        cache,
        cipher.clone(),
        config.cache_ttl(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pipeline = if args.consume {
        let queue = Arc::new(
            AmqpQueue::connect(&config.amqp_url)
                .await
                .context("connecting to RabbitMQ")?,
        );
        let queue_name = queue
            .declare_queue(&config.queue_name, QueueOptions::default())
            .await
            .context("declaring queue")?;
        let consumer = Consumer::new(queue.clone(), store.clone(), cipher.clone(), config.pipeline);
        let rx = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            let result = consumer.run(&queue_name, rx).await;
            if let Err(e) = queue.close().await {
                warn!(error = %e, "Closing broker connection failed");
            }
            result
        }))
    } else {
        None
    };

    tokio::spawn(forward_shutdown(tokio::signal::ctrl_c(), shutdown_tx));

    let listener = TcpListener::bind(("0.0.0.0", config.http_port))
        .await
        .with_context(|| format!("binding HTTP port {}", config.http_port))?;
    info!(port = config.http_port, "HTTP server listening");

    let mut server_shutdown = shutdown_rx.clone();
    axum::serve(listener, build_router(service))
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .context("HTTP server failed")?;

    if let Some(handle) = pipeline {
        match handle.await {
            Ok(Ok(report)) => info!(
                acked = report.acked,
                rejected = report.rejected,
                ack_failed = report.ack_failed,
                "Consumer finished"
            ),
            Ok(Err(e)) => error!(error = %e, "Consumer stopped with error"),
            Err(e) => error!(error = %e, "Consumer task panicked"),
        }
    }

    info!("Shutdown complete");
    Ok(())
}
