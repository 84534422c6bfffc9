mod cluster;
mod config;
mod error;
mod http;
mod kafka;
mod metrics;
mod test_strategies;

use crate::cluster::ClusterManager;
use crate::config::Config;
use crate::http::server::HttpServer;
use crate::metrics::registry::MetricsRegistry;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Minimum age before a cluster's metrics stop being rendered.
const MIN_STALENESS_THRESHOLD: Duration = Duration::from_secs(90);

#[derive(Parser, Debug)]
#[command(name = "kcg-exporter")]
#[command(about = "Kafka consumer group lag exporter backed by kafka-consumer-groups.sh")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level);

    info!("Starting kcg-exporter");

    // Load configuration
    let config = Config::load(Some(&args.config))?;
    info!(
        clusters = config.clusters.len(),
        poll_interval = ?config.exporter.poll_interval,
        command_timeout = ?config.exporter.command_timeout,
        "Configuration loaded"
    );

    // Metrics from a cluster that missed three polls are no longer rendered
    let staleness_threshold = (config.exporter.poll_interval * 3).max(MIN_STALENESS_THRESHOLD);
    let registry = Arc::new(MetricsRegistry::with_staleness_threshold(
        staleness_threshold,
    ));

    // Create shutdown channel
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Spawn cluster managers
    let mut handles = Vec::new();
    for cluster_config in config.clusters.clone() {
        let registry = Arc::clone(&registry);
        let shutdown_rx = shutdown_tx.subscribe();
        let exporter_config = config.exporter.clone();

        let handle = tokio::spawn(async move {
            let manager = match ClusterManager::new(&cluster_config, registry, &exporter_config) {
                Ok(m) => m,
                Err(e) => {
                    error!(
                        cluster = cluster_config.name,
                        error = %e,
                        "Failed to create cluster manager"
                    );
                    return;
                }
            };

            manager.run(shutdown_rx).await;
        });

        handles.push(handle);
    }

    // Create and start HTTP server
    let http_server = HttpServer::new(
        &config.exporter.http_host,
        config.exporter.http_port,
        Arc::clone(&registry),
    )?;

    let shutdown_rx = shutdown_tx.subscribe();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = http_server.run(shutdown_rx).await {
            error!(error = %e, "HTTP server error");
        }
    });

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received, stopping...");

    // Notify all tasks to shutdown
    let _ = shutdown_tx.send(());

    // Wait for server to shutdown
    let _ = server_handle.await;

    // Wait for cluster managers to shutdown (with timeout)
    let shutdown_timeout = tokio::time::timeout(
        Duration::from_secs(10),
        futures::future::join_all(handles),
    );

    match shutdown_timeout.await {
        Ok(_) => info!("All cluster managers stopped"),
        Err(_) => error!("Timeout waiting for cluster managers to stop"),
    }

    info!("kcg-exporter stopped");
    Ok(())
}

fn init_logging(level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
