//! Resilient Gateway
//!
//! Hosts the resilience layer shared by the GitHub repository layer and the
//! AI service factory, and exposes its circuit state for health checks.
//!
//! This binary only hosts: it owns the circuit registry, the admin API and
//! config reload, but issues no provider calls itself. Tool handlers embed
//! the library, build a `Gateway` and route their calls through
//! `gateway.executor`; until they do, every circuit reads as Closed.
//!
//! # Architecture Overview
//!
//! ```text
//!   tool call ──▶ ResilientExecutor ──▶ CircuitRegistry (per provider)
//!                     │   ▲
//!                     │   └── classify ─▶ retry policy ─▶ backoff (sleep, cancellable)
//!                     ▼
//!             provider chain (priority order): main → fallback → prd → research
//!
//!   admin API ──▶ circuit snapshots (read only)
//!   config file ──▶ watcher ──▶ settings swap (circuit state kept)
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use resilient_gateway::config::loader::load_config;
use resilient_gateway::config::watcher::ConfigWatcher;
use resilient_gateway::config::GatewayConfig;
use resilient_gateway::lifecycle::signals::shutdown_signal;
use resilient_gateway::observability::{logging, metrics};
use resilient_gateway::{admin, Gateway, Shutdown};

#[derive(Parser)]
#[command(name = "resilient-gateway")]
#[command(about = "Retry, circuit breaking and provider fallback for GitHub and AI calls", long_about = None)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "resilient-gateway starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to install metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let gateway = Gateway::build(&config);
    let shutdown = Shutdown::new();

    let admin_task = if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        let state = gateway.admin.clone();
        let rx = shutdown.subscribe();
        Some(tokio::spawn(async move {
            if let Err(e) = admin::serve(listener, state, rx).await {
                tracing::error!(error = %e, "Admin API failed");
            }
        }))
    } else {
        tracing::info!("Admin API disabled");
        None
    };

    // The watcher stops when dropped, so hold it for the life of the process.
    let (_watcher, mut config_updates) = match &args.config {
        Some(path) => {
            let (watcher, rx) = ConfigWatcher::new(path);
            (Some(watcher.run()?), Some(rx))
        }
        None => (None, None),
    };

    let signal = shutdown_signal();
    tokio::pin!(signal);

    loop {
        tokio::select! {
            _ = &mut signal => break,
            Some(new_config) = async {
                match config_updates.as_mut() {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                gateway.apply(&new_config);
            }
        }
    }

    shutdown.trigger();
    if let Some(task) = admin_task {
        let _ = task.await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
