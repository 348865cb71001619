//! Lattice node binary: CLI parsing, logging bootstrap, and graceful
//! shutdown around the node event loop.

use anyhow::{Context, Result};
use clap::Parser;
use lattice_node::{Node, NodeConfig};
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info};

/// Lattice ledger node
#[derive(Parser)]
#[command(name = "lattice-node")]
#[command(about = "Block-lattice ledger node with milestone consensus")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "lattice.toml", env = "LATTICE_CONFIG")]
    config: PathBuf,

    /// Override the data directory
    #[arg(long, env = "LATTICE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Peers to dial at startup, in addition to the configured ones
    #[arg(long = "connect")]
    connect: Vec<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log to this file instead of the console
    #[arg(long, env = "LATTICE_LOG_FILE")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Parser)]
enum Command {
    /// Write a default configuration file and exit
    Init,

    /// Show node version
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("{log_level},lattice_node=debug").into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    match &cli.log_file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("failed to open log file {path:?}"))?;
            builder.with_writer(std::sync::Arc::new(file)).with_ansi(false).init();
        }
        None => builder.init(),
    }

    if let Some(cmd) = cli.command {
        match cmd {
            Command::Init => {
                write_default_config(&cli.config)?;
                return Ok(());
            }
            Command::Version => {
                println!("lattice-node v{}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
        }
    }

    info!("starting lattice-node v{}", env!("CARGO_PKG_VERSION"));

    let mut config = if cli.config.exists() {
        let config = NodeConfig::load(&cli.config)?;
        info!("loaded configuration from {:?}", cli.config);
        config
    } else {
        info!("no configuration file at {:?}, using defaults", cli.config);
        NodeConfig::default()
    };

    // Apply CLI overrides
    if let Some(data_dir) = cli.data_dir {
        config.node.data_dir = data_dir;
    }
    if let Some(port) = cli.port {
        config.network.port = port;
    }
    config.network.connect.extend(cli.connect);

    config.validate()?;

    let mut node = Node::init(config)?;

    tokio::select! {
        result = node.run() => {
            if let Err(e) = result {
                error!("node error: {e}");
                return Err(e);
            }
        }
        _ = signal::ctrl_c() => {
            info!("received shutdown signal (Ctrl+C)");
            node.shutdown();
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal (SIGTERM)");
            node.shutdown();
        }
    }

    info!("node stopped");
    Ok(())
}

fn write_default_config(path: &PathBuf) -> Result<()> {
    if path.exists() {
        anyhow::bail!("refusing to overwrite existing {path:?}");
    }
    let rendered =
        toml::to_string_pretty(&NodeConfig::default()).context("failed to render defaults")?;
    std::fs::write(path, rendered).with_context(|| format!("failed to write {path:?}"))?;
    println!("wrote default configuration to {path:?}");
    Ok(())
}

/// Cross-platform shutdown signal handling
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    sigterm.recv().await;
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    std::future::pending::<()>().await
}
