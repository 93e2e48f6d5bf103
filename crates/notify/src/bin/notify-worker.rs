//! notify-worker: delivers rendered notifications over email, SMS and push.
//!
//! Subscribes to:
//! - `kurier.notify.<channel>` for every channel
//!
//! Publishes:
//! - `kurier.deadletter` for deliveries that failed for good
//! - `kurier.worker.health` periodic health pings

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use kurier_bus::{topics, Transport, WorkerBuilder, WorkerRunner, ZmqPublisher, ZmqSubscriber};
use kurier_core::{KurierConfig, PipelineStats};
use kurier_notify::{DeliveryWorker, Dispatcher};

// ── CLI ─────────────────────────────────────────────────────────────

/// Kurier notify worker: delivers queued channel messages.
#[derive(Parser, Debug)]
#[command(name = "notify-worker", version, about)]
struct Cli {
    /// Path to kurier.toml config file.
    #[arg(long, env = "KURIER_CONFIG", default_value = "config/kurier.toml")]
    config: String,

    /// Health ping interval in seconds.
    #[arg(long, env = "NOTIFY_HEALTH_INTERVAL", default_value_t = 30)]
    health_interval: u64,

    /// Shutdown timeout in seconds.
    #[arg(long, env = "NOTIFY_SHUTDOWN_TIMEOUT", default_value_t = 10)]
    shutdown_timeout: u64,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    kurier_core::config::load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match KurierConfig::from_file(&cli.config) {
        Ok(cfg) => {
            info!(path = %cli.config, "loaded kurier config");
            cfg
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                path = %cli.config,
                "failed to load config, using defaults"
            );
            KurierConfig::from_toml("")?
        }
    };
    config.log_summary();

    let frontend: Transport = config.bus.frontend.parse()?;
    let backend: Transport = config.bus.backend.parse()?;

    let publisher = Arc::new(ZmqPublisher::connect(&frontend, config.bus.partitions).await?);
    let subscriber = ZmqSubscriber::connect(&backend, config.bus.partitions).await?;
    subscriber.subscribe(topics::NOTIFY_PREFIX).await?;

    let dispatcher = Dispatcher::from_config(&config.notify, &config.retry)?;
    let stats = Arc::new(PipelineStats::new());
    let worker = Arc::new(DeliveryWorker::new(
        Arc::new(subscriber),
        publisher.clone(),
        dispatcher,
        stats,
    ));

    let runner_config = WorkerBuilder::new("notify-worker")
        .health_interval(Duration::from_secs(cli.health_interval))
        .shutdown_timeout(Duration::from_secs(cli.shutdown_timeout))
        .build();

    // Shutdown comes from OS signals only.
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    info!("notify-worker starting");
    WorkerRunner::run(worker, publisher, runner_config, shutdown_rx).await?;
    info!("notify-worker exited cleanly");

    Ok(())
}
