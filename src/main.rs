mod catalog;
mod config;
mod peer;
mod retry;
mod serve;
mod signals;
mod webseed;

use clap::Parser;
use config::{AppConfig, PeerImpl};
use std::path::PathBuf;

/// Model-distribution catalog service. Optionally launches and supervises a
/// local peer sidecar whose endpoint is advertised to bootstrapping clients.
#[derive(Parser, Debug)]
#[command(name = "hfbt", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "hfbt.toml")]
    config: PathBuf,

    /// Bind address (overrides config)
    #[arg(long)]
    bind: Option<String>,

    /// Listen port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable the local peer (overrides config)
    #[arg(long)]
    peer: bool,

    /// Peer implementation: external or sidecar (overrides config)
    #[arg(long, value_name = "IMPL")]
    peer_impl: Option<PeerImpl>,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (sidecar output, launch decisions)
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(bind) = &self.bind {
            config.server.bind = bind.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if self.peer {
            config.peer.enabled = true;
        }
        if let Some(implementation) = self.peer_impl {
            config.peer.implementation = implementation;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "hfbt=debug" } else { "hfbt=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();

    tracing::info!("hfbt starting");
    tracing::debug!(?cli, "parsed CLI arguments");

    let mut config = AppConfig::load(&cli.config)?;
    cli.apply_overrides(&mut config);

    if cli.dry_run {
        println!("{config:#?}");
        return Ok(());
    }

    let peer = peer::from_config(&config.peer);
    if config.peer.enabled {
        peer.start().await;
    }

    let webseed = webseed::WebseedProxy::new(config.webseed.clone())?;
    let state = serve::AppState::new(&config, peer.clone(), webseed);
    let result = serve::run(&config, state, signals::shutdown_signal()).await;

    peer.shutdown().await;
    tracing::info!("hfbt stopped");
    result
}
