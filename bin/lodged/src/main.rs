//! Lodge Daemon - Metadata service for per-identity filesystem trees.
//!
//! Provides:
//! - The client-facing operations over TCP
//! - A pooled client to the propagation service
//! - A reference in-memory propagation service for local development

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::select;
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use lodge_meta::{Executor, ServiceConfig};
use lodge_prop::{MemoryPropagator, PooledPropagator, Propagator};

/// Lodge metadata service.
#[derive(Parser)]
#[command(name = "lodged")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, default_value = "~/.lodge/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the metadata service (default)
    Run {
        /// Listen address
        #[arg(short, long)]
        listen: Option<SocketAddr>,

        /// Data directory
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Propagation service address
        #[arg(long)]
        prop: Option<String>,
    },

    /// Print the effective configuration
    Config,

    /// Run an in-memory propagation service
    Propagator {
        /// Listen address
        #[arg(short, long, default_value = "127.0.0.1:57003")]
        listen: SocketAddr,
    },
}

/// Expand ~ to home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

/// Loads the config file, then applies the environment.
fn load_config(path: &Path) -> Result<ServiceConfig> {
    let path = expand_tilde(path);
    if !path.exists() {
        info!("No config file found at {:?}, using defaults", path);
    }

    ServiceConfig::load(&path)
        .with_context(|| format!("Failed to load {}", path.display()))?
        .apply_env()
        .context("Invalid environment configuration")
}

async fn run(config: ServiceConfig) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    config
        .create_dirs()
        .context("Failed to create data directories")?;

    let client = match &config.prop_addr {
        Some(addr) => Some(
            PooledPropagator::new(addr.clone(), config.pool.clone())
                .context("Invalid propagation pool configuration")?,
        ),
        None => {
            warn!("No propagation service configured, metadata is filesystem-only");
            None
        }
    };
    let propagator = client
        .clone()
        .map(|client| Arc::new(client) as Arc<dyn Propagator>);

    let executor = Arc::new(Executor::from_config(&config, propagator));
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;

    info!("Starting lodge daemon");
    info!("Effective configuration:\n{}", config.display());

    println!("Lodge daemon running");
    println!("  Listen: {}", config.listen_addr);
    println!(
        "  Propagation: {}",
        config.prop_addr.as_deref().unwrap_or("disabled")
    );
    println!();
    println!("Press Ctrl+C to stop");

    select! {
        result = lodge_meta::serve(listener, executor) => {
            result.context("Server failed")?;
        }
        result = signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            info!("Received shutdown signal");
        }
    }

    if let Some(client) = client {
        let status = client.status();
        info!(
            opened = status.opened,
            closed = status.closed,
            "Closing propagation pool"
        );
        client.shutdown();
    }

    info!("Daemon stopped");
    Ok(())
}

async fn run_propagator(listen: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind {}", listen))?;

    println!("Propagation service running on {}", listen);
    println!("Press Ctrl+C to stop");

    select! {
        result = lodge_prop::serve(listener, Arc::new(MemoryPropagator::new())) => {
            result.context("Propagation service failed")?;
        }
        result = signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            info!("Received shutdown signal");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set up logging")?;

    let mut config = load_config(&cli.config)?;

    match cli.command.unwrap_or(Commands::Run {
        listen: None,
        data_dir: None,
        prop: None,
    }) {
        Commands::Run {
            listen,
            data_dir,
            prop,
        } => {
            if let Some(addr) = listen {
                config.listen_addr = addr;
            }
            if let Some(dir) = data_dir {
                config.data_dir = dir;
            }
            if let Some(addr) = prop {
                config.prop_addr = Some(addr);
            }
            run(config).await
        }

        Commands::Config => {
            println!("{}", config.display());
            Ok(())
        }

        Commands::Propagator { listen } => run_propagator(listen).await,
    }
}
