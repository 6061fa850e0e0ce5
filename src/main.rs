//! sitewalld - block and allow websites on a MikroTik appliance
//!
//! Serves a small HTTP API and reconciles each request against the
//! appliance's layer-7 matchers and firewall filter rules.

mod api;

use anyhow::{Context, Result};
use clap::Parser;
use sitewall_config::load_config;
use sitewall_reconcile::SiteAccessReconciler;
use sitewall_routeros::RouterOsClient;
use std::{path::PathBuf, sync::Arc};
use tokio::net::TcpListener;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Parser)]
#[command(name = "sitewalld", about = "Website block/allow service for MikroTik appliances")]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/sitewall/config.toml")]
    config: PathBuf,

    /// Address to serve the HTTP API on (overrides api.listen)
    #[arg(short, long)]
    listen: Option<String>,

    /// Log level (overrides system.log_level)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    // Initialize logging
    let level: Level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.system.log_level)
        .parse()
        .context("Invalid log level")?;
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!(config = ?args.config, "Starting sitewall");

    let appliance = config.appliance.address();
    let client = Arc::new(RouterOsClient::new(config.appliance.clone()));
    let reconciler = SiteAccessReconciler::new(client, config.appliance.timeout());

    let state = api::AppState {
        reconciler: Arc::new(reconciler),
        appliance: appliance.clone(),
    };

    let listen = args.listen.unwrap_or(config.api.listen);
    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("Failed to bind {listen}"))?;

    info!(listen = %listen, appliance = %appliance, "API listening. Press Ctrl+C to stop.");

    axum::serve(listener, api::app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down...");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
    }
}
