//! pipeline-worker: validates, filters, enriches and aggregates raw events.
//!
//! Subscribes to:
//! - `kurier.events.raw`
//!
//! Publishes:
//! - `kurier.events.{enriched,rejected,filtered}` and `kurier.segment.<segment>`
//! - `kurier.metrics.windows` closed aggregation windows
//! - `kurier.alerts` threshold alerts
//! - `kurier.notify.<channel>` rendered notifications
//! - `kurier.deadletter` malformed input and unroutable notifications
//! - `kurier.worker.health` periodic health pings
//!
//! With `--deliver`, a delivery worker for `kurier.notify.*` runs in the
//! same process.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use kurier_bus::{topics, Transport, WorkerBuilder, WorkerRunner, ZmqPublisher, ZmqSubscriber};
use kurier_core::{KurierConfig, PipelineStats, RetryPolicy};
use kurier_notify::{DeliveryWorker, Dispatcher};
use kurier_pipeline::{spawn_eviction_sweep, spawn_stats_server, EventProcessor, PipelineWorker, StatsState};

// ── CLI ─────────────────────────────────────────────────────────────

/// Kurier pipeline worker.
#[derive(Parser, Debug)]
#[command(name = "pipeline-worker", version, about)]
struct Cli {
    /// Path to kurier.toml config file.
    #[arg(long, env = "KURIER_CONFIG", default_value = "config/kurier.toml")]
    config: String,

    /// Also run notification delivery in this process.
    #[arg(long, env = "KURIER_DELIVER")]
    deliver: bool,

    /// Window close tick in milliseconds.
    #[arg(long, env = "PIPELINE_TICK_MS", default_value_t = 1000)]
    tick_ms: u64,

    /// Health ping interval in seconds.
    #[arg(long, env = "PIPELINE_HEALTH_INTERVAL", default_value_t = 30)]
    health_interval: u64,

    /// Shutdown timeout in seconds.
    #[arg(long, env = "PIPELINE_SHUTDOWN_TIMEOUT", default_value_t = 10)]
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
    subscriber.subscribe(topics::EVENTS_RAW).await?;

    let stats = Arc::new(PipelineStats::new());
    let processor = Arc::new(EventProcessor::new(&config, publisher.clone(), stats.clone())?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Background tasks ────────────────────────────────────────────
    let sweep_every = Duration::from_secs(config.window.eviction_interval_secs.max(1));
    let sweeps = [
        spawn_eviction_sweep(processor.metrics_windows().clone(), sweep_every, shutdown_rx.clone()),
        spawn_eviction_sweep(processor.failure_windows().clone(), sweep_every, shutdown_rx.clone()),
    ];

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let server = spawn_stats_server(
        addr,
        StatsState {
            stats: stats.clone(),
            windows: processor.metrics_windows().clone(),
        },
        shutdown_rx.clone(),
    );

    // ── Workers ─────────────────────────────────────────────────────
    let pipeline = Arc::new(
        PipelineWorker::new(processor, Arc::new(subscriber))
            .with_tick_interval(Duration::from_millis(cli.tick_ms.max(1)))
            .with_retry(RetryPolicy::from_config(&config.retry)),
    );
    let runner_config = |name: &str| {
        WorkerBuilder::new(name)
            .health_interval(Duration::from_secs(cli.health_interval))
            .shutdown_timeout(Duration::from_secs(cli.shutdown_timeout))
            .build()
    };

    info!(deliver = cli.deliver, "pipeline-worker starting");
    if cli.deliver {
        let notify_subscriber = ZmqSubscriber::connect(&backend, config.bus.partitions).await?;
        notify_subscriber.subscribe(topics::NOTIFY_PREFIX).await?;
        let delivery = Arc::new(DeliveryWorker::new(
            Arc::new(notify_subscriber),
            publisher.clone(),
            Dispatcher::from_config(&config.notify, &config.retry)?,
            stats.clone(),
        ));
        tokio::try_join!(
            WorkerRunner::run(pipeline, publisher.clone(), runner_config("pipeline-worker"), shutdown_rx.clone()),
            WorkerRunner::run(delivery, publisher.clone(), runner_config("notify-worker"), shutdown_rx.clone()),
        )?;
    } else {
        WorkerRunner::run(pipeline, publisher.clone(), runner_config("pipeline-worker"), shutdown_rx.clone()).await?;
    }

    shutdown_tx.send(true).ok();
    for task in sweeps {
        task.await.ok();
    }
    server.await.ok();
    info!("pipeline-worker exited cleanly");

    Ok(())
}
