//! The ringline relay server binary.

use anyhow::Context;
use clap::Parser;
use ringline_server::config::ServerConfig;
use ringline_server::push::{PushConfig, PushService};
use ringline_server::server::RelayServer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "ringline",
    version,
    about = "Relays calls between a coding agent and a human operator's browser"
)]
struct Cli {
    /// Address to bind.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 3001)]
    port: u16,

    /// Seconds a call rings before it is reported as unanswered.
    #[arg(long, default_value_t = 60)]
    ring_timeout_secs: u64,

    /// Seconds finished calls stay queryable before being pruned.
    #[arg(long, default_value_t = 3600)]
    call_retention_secs: u64,

    /// Seconds between retention sweeps.
    #[arg(long, default_value_t = 60)]
    prune_interval_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let push = match PushConfig::from_env() {
        Some(config) => Some(
            PushService::new(&config).context("failed to initialize the push service")?,
        ),
        None => {
            info!("push not configured, running connection-only");
            None
        }
    };

    let config = ServerConfig {
        host: cli.host,
        port: cli.port,
        ring_timeout_secs: cli.ring_timeout_secs,
        call_retention_secs: cli.call_retention_secs,
        prune_interval_secs: cli.prune_interval_secs,
    };

    let server = RelayServer::new(config, push);
    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    server.run().await.context("relay server failed")
}
