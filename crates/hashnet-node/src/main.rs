//! Hashnet Node -- one overlay peer on TCP.
//!
//! Usage:
//!   hashnet-node                      # Run with default config
//!   hashnet-node --config path.toml   # Run with custom config
//!   hashnet-node identity             # Print the configured identity

use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};

use hashnet_node::config::NodeConfig;
use hashnet_node::{expand_tilde, AdmissionError, Handler, Peer, PeerEvent, StreamTransport};

#[derive(Parser)]
#[command(name = "hashnet-node", about = "Hashnet overlay peer")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "~/.hashnet/config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node (default)
    Run,
    /// Print the peer identity (random unless set in config)
    Identity,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hashnet_node=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let cfg = NodeConfig::load_or_default(&config_path)?;

    match cli.command {
        Some(Commands::Identity) => {
            let id = cfg.peer.identity()?;
            println!("Peer ID: {id}");
            if cfg.peer.identity.is_none() {
                println!("(random; set [peer] identity in {} to pin it)", config_path.display());
            }
        }
        Some(Commands::Run) | None => {
            run_node(cfg).await?;
        }
    }

    Ok(())
}

async fn run_node(cfg: NodeConfig) -> anyhow::Result<()> {
    let peer = Peer::new(cfg.peer.clone())?;
    tracing::info!(
        peer_id = %peer.id(),
        version = env!("CARGO_PKG_VERSION"),
        listen = %cfg.network.listen_addr,
        bootnodes = cfg.network.bootnodes.len(),
        "starting hashnet-node"
    );

    peer.add_procedure(
        "echo",
        Handler::sync(|data: Value, _| Ok(json!({ "echo": data }))),
    )
    .await;

    let listener = TcpListener::bind(&cfg.network.listen_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    let accept_handle = {
        let peer = peer.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        tracing::debug!(%addr, "net: inbound connection");
                        admit(&peer, stream).await;
                    }
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                    }
                }
            }
        })
    };

    for bootnode in &cfg.network.bootnodes {
        tracing::debug!(addr = %bootnode.addr, "net: dialling");
        match TcpStream::connect(&bootnode.addr).await {
            Ok(stream) => admit(&peer, stream).await,
            Err(e) => tracing::warn!(addr = %bootnode.addr, "net: dial failed: {e}"),
        }
    }

    let events_handle = {
        let mut events = peer.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                match event {
                    PeerEvent::Shutdown => break,
                    PeerEvent::Tick => tracing::trace!("tick"),
                    other => tracing::debug!(event = ?other, "peer event"),
                }
            }
        })
    };

    tracing::info!("running, press Ctrl-C to stop");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down...");
    accept_handle.abort();
    peer.shutdown().await;
    let _ = tokio::time::timeout(Duration::from_secs(1), events_handle).await;

    tracing::info!("shutdown complete");
    Ok(())
}

/// Wrap a TCP stream and hand it to the peer; destroy it if refused.
async fn admit(peer: &Peer, stream: TcpStream) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!("net: set_nodelay failed: {e}");
    }
    let link = StreamTransport::spawn(stream, Duration::ZERO);
    match peer.add_connection(link, None).await {
        Ok(slot) => tracing::debug!(slot, "net: link admitted"),
        Err(e) => {
            tracing::warn!("net: link refused: {e}");
            if let Some(link) = AdmissionError::into_link(e) {
                link.destroy();
            }
        }
    }
}
