//! Prometheus exporter for TTN gateway connection statistics.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

use ttn_gateway_exporter::{ClientMetrics, HttpServer, Registry, TargetCollector, TargetConfig};

/// Prometheus exporter for TTN gateway connection statistics.
#[derive(Parser, Debug)]
#[command(name = "ttn-gateway-exporter")]
#[command(about = "Export TTN gateway connection statistics as Prometheus metrics")]
#[command(version)]
struct Args {
    /// HTTP listener address.
    #[arg(long, default_value = ":8080")]
    address: String,

    /// Path to the target configuration file.
    #[arg(long, default_value = "/etc/ttn-exporter/targets.yaml")]
    target_config_path: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log output format (text, json).
    #[arg(long, default_value = "text")]
    log_format: String,
}

/// A bare ":8080" listener address binds all interfaces.
fn parse_listen_addr(address: &str) -> anyhow::Result<SocketAddr> {
    let address = if address.starts_with(':') {
        format!("0.0.0.0{address}")
    } else {
        address.to_string()
    };
    address
        .parse()
        .with_context(|| format!("invalid listener address {address:?}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = args.log_level.parse().unwrap_or(Level::INFO);
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("ttn_gateway_exporter={}", log_level).parse()?);

    if args.log_format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = TargetConfig::load_from_file(&args.target_config_path)
        .with_context(|| format!("target config error at {:?}", args.target_config_path))?;

    // Build the registry: client instrumentation first, then one collector
    // per configured gateway. Any failure here aborts startup.
    let client_metrics = Arc::new(ClientMetrics::new());
    let mut registry = Registry::new();
    registry
        .register(client_metrics.clone())
        .context("error registering client instrumentation")?;

    for target in config.targets {
        let gateway_id = target.gateway_id.clone();
        let base_url = target.base_url().to_string();

        let collector = TargetCollector::new(target, client_metrics.clone()).with_context(
            || format!("error creating target {gateway_id:?} with base url {base_url:?}"),
        )?;
        registry
            .register(Arc::new(collector))
            .with_context(|| format!("error registering target {gateway_id:?}"))?;

        info!(gateway = %gateway_id, base_url = %base_url, "registered target");
    }

    let listen_addr = parse_listen_addr(&args.address)?;
    let registry = Arc::new(registry);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server = HttpServer::new(registry, listen_addr);
    let mut server_task = tokio::spawn(async move {
        if let Err(e) = server.run(shutdown_rx).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Wait for shutdown signal; a server that stops on its own (e.g. a bind
    // failure) is fatal.
    tokio::select! {
        _ = &mut server_task => {
            anyhow::bail!("HTTP server terminated unexpectedly");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = tokio::signal::unix::signal(
                    tokio::signal::unix::SignalKind::terminate()
                ).unwrap();
                sigterm.recv().await;
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }

    shutdown_tx.send(true)?;
    let _ = tokio::time::timeout(Duration::from_secs(5), server_task).await;

    info!("Exporter stopped");
    Ok(())
}
