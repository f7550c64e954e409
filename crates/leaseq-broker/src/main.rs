use axum::{extract::State, http::StatusCode, routing::get, Router};
use clap::Parser;
use leaseq_broker::{Broker, BrokerConfig, BrokerMetrics};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "leaseq-broker")]
#[command(about = "Lease-based task queue broker", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Interface to listen on
    #[arg(short = 'i', long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory holding the checkpoint file
    #[arg(short, long)]
    checkpoint_dir: Option<PathBuf>,

    /// Lease timeout in seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Serve Prometheus metrics on this port
    #[arg(long)]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let config_found = args.config.exists();
    let mut config = if config_found {
        BrokerConfig::from_file(&args.config)?
    } else {
        BrokerConfig::default()
    };

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.monitoring.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if !config_found {
        tracing::debug!("Config file {:?} not found, using defaults", args.config);
    }

    // Override with CLI args
    if let Some(host) = args.host {
        config.broker.host = host;
    }
    if let Some(port) = args.port {
        config.broker.port = port;
    }
    if let Some(dir) = args.checkpoint_dir {
        config.persistence.checkpoint_dir = dir;
    }
    if let Some(timeout) = args.timeout {
        config.leases.timeout_secs = timeout;
    }
    if let Some(port) = args.metrics_port {
        config.monitoring.metrics_port = Some(port);
    }

    tracing::info!("Starting broker with config: {:?}", config);

    let broker = Arc::new(Broker::new(config.clone())?);

    if let Some(port) = config.monitoring.metrics_port {
        let metrics = broker.metrics();
        let host = config.broker.host.clone();
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(metrics, &host, port).await {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    }

    let signal_broker = broker.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => signal_broker.shutdown(),
            Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    broker.run().await
}

async fn start_metrics_server(
    metrics: Arc<BrokerMetrics>,
    host: &str,
    port: u16,
) -> anyhow::Result<()> {
    async fn metrics_handler(
        State(metrics): State<Arc<BrokerMetrics>>,
    ) -> Result<String, StatusCode> {
        metrics.render().map_err(|e| {
            tracing::error!("Failed to render metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
    }

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics);

    let addr = format!("{}:{}", host, port);
    tracing::info!("Metrics server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
