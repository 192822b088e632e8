use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use riptide_client::config::ClientConfig;
use riptide_client::prefs::MemoryPrefs;
use riptide_client::session::SessionSupervisor;
use riptide_client::sync::bus::{ChannelTransport, EventTransport};
use riptide_client::sync::engine::{ClientRuntime, TransportFactory};

/// Headless synchronization client. Connects to an instance, mirrors its
/// state, and logs snapshot changes until interrupted.
#[derive(Parser)]
#[command(name = "riptide", version)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "riptide.toml")]
    config: String,
    /// Base URL of the instance REST API (overrides config).
    #[arg(long)]
    base_url: Option<String>,
    /// Session token (overrides config).
    #[arg(long)]
    token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = ClientConfig::load(&args.config);

    let base_url = args
        .base_url
        .or(config.instance.base_url)
        .context("no base URL configured; pass --base-url or set instance.base_url")?;
    let token = args.token.or(config.instance.auth_token);

    let prefs = Arc::new(MemoryPrefs::new());
    let supervisor = SessionSupervisor::restore(prefs).await;

    // The live transport is produced per engine generation. The channel
    // transport here is a stand-in until a wire transport feeds it.
    let transports: TransportFactory = Arc::new(|| {
        let (_feed, transport) = ChannelTransport::new(64);
        Box::new(transport) as Box<dyn EventTransport>
    });

    let mut runtime = ClientRuntime::new(supervisor, transports, config.sync);
    runtime
        .set_base_url(&base_url)
        .await
        .context("failed to start sync engine")?;
    if let Some(token) = token {
        runtime
            .set_token(&token)
            .await
            .context("failed to apply session token")?;
    }

    info!(%base_url, "riptide client running; press ctrl-c to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    if let Some(engine) = runtime.engine() {
        info!(
            servers = engine.servers().borrow().len(),
            channels = engine.channels().borrow().len(),
            "final snapshot"
        );
    }
    runtime.shutdown().await;
    info!("riptide client stopped");
    Ok(())
}
