use std::fs;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use metafs_kv::{MemDirIndex, MemLogStore};
use metafs_net::{Loopback, RequestHandler, Transport};
use metafs_server::{CoordinatorHandle, MetaNode, ServerConfig};

/// MetaFS Metadata Server
#[derive(Parser, Debug)]
#[command(name = "metafs-server", version, about)]
struct Args {
    /// Path to configuration file (JSON)
    #[arg(short, long, default_value = "metafs-server.json")]
    config: String,

    /// Dump default configuration and exit
    #[arg(long)]
    dump_default_config: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    if args.dump_default_config {
        println!("{}", serde_json::to_string_pretty(&ServerConfig::default())?);
        return Ok(());
    }

    let config: ServerConfig = match fs::read_to_string(&args.config) {
        Ok(text) => serde_json::from_str(&text)?,
        Err(err) => {
            tracing::warn!(config = %args.config, %err, "config not readable, using defaults");
            ServerConfig::default()
        }
    };
    config.validate().map_err(|status| anyhow::anyhow!(status.describe()))?;

    tracing::info!(
        slot = config.server_slot,
        sessions = config.num_sessions,
        workers = config.workers_per_server,
        "starting metadata server"
    );

    let node = Arc::new(
        MetaNode::new(
            config,
            Arc::new(MemDirIndex::new()),
            Arc::new(MemLogStore::new()),
        )
        .map_err(|status| anyhow::anyhow!(status.describe()))?,
    );

    // Single-process transport; a multi-server deployment plugs a remote
    // transport in here instead.
    let handlers: Vec<Arc<dyn RequestHandler>> = vec![Arc::clone(&node) as Arc<dyn RequestHandler>];
    let transport: Arc<dyn Transport> = Arc::new(Loopback::new(handlers));
    let _coordinator = CoordinatorHandle::spawn(node.coordinator(transport));

    tracing::info!("metadata server running");
    loop {
        std::thread::park();
    }
}
