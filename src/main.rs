use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gatekeeper::config::GatekeeperConfig;
use gatekeeper::http::{build_router, HttpServer};
use gatekeeper::ratelimit::{
    AdmissionController, DistributedCounterStore, LocalCounterStore, PolicySet, SystemClock,
};

/// Fixed-window admission control in front of an HTTP API.
#[derive(Debug, Parser)]
#[command(name = "gatekeeper", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "GATEKEEPER_CONFIG")]
    config: Option<PathBuf>,

    /// Address to serve HTTP on (overrides the configuration)
    #[arg(long)]
    http_addr: Option<SocketAddr>,

    /// Redis URL for the distributed counter store (overrides the configuration)
    #[arg(long)]
    redis_url: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("gatekeeper=info"));
    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting Gatekeeper Admission Control Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = GatekeeperConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.http_addr {
        config.server.http_addr = addr;
    }
    if let Some(url) = args.redis_url {
        config.store.redis_url = Some(url);
    }
    info!(http_addr = %config.server.http_addr, "Configuration loaded");

    let policies = PolicySet::from_config(&config.rate_limiting)?;
    let shortest = policies
        .shortest_window()
        .ok_or_else(|| anyhow::anyhow!("no admission policies configured"))?;
    let sweep_interval = config.rate_limiting.sweep_interval(shortest)?;

    // The local store is always available as the fallback
    let local = Arc::new(LocalCounterStore::new(Arc::new(SystemClock)));
    local.start(sweep_interval);

    let controller = match DistributedCounterStore::from_config(&config.store)? {
        Some(distributed) => {
            // Bounded by the command timeout; startup continues either way.
            if let Err(e) = distributed.ping().await {
                warn!(
                    error = %e,
                    "Distributed counter store unreachable at startup, counting locally"
                );
            }
            AdmissionController::with_distributed(Arc::new(distributed), local.clone())
        }
        None => {
            info!("No Redis URL configured, counting in the local store only");
            AdmissionController::new(local.clone())
        }
    }
    .with_store_timeout(config.store.command_timeout());
    let controller = Arc::new(controller);
    info!(policies = policies.len(), "Admission controller initialized");

    let router = build_router(controller, &policies)?;
    let server = HttpServer::new(config.server.http_addr, router);

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    local.stop();
    info!("Gatekeeper Admission Control Service stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
