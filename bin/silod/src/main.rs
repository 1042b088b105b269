//! Silo Daemon - runs one node of the distributed file store.
//!
//! Provides:
//! - Blob storage and serving under the configured root
//! - Network join via bootstrap nodes and peer gossip
//! - A local demo mode spinning up a three-node network

use std::io::Cursor;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::signal;
use tokio::time::sleep;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use silo_server::{FileServer, ServerConfig};

/// Silo daemon service.
#[derive(Parser)]
#[command(name = "silod")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, default_value = "~/.silo/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (default)
    Run {
        /// Listen address
        #[arg(short, long)]
        listen: Option<SocketAddr>,

        /// Bootstrap node addresses to join through
        #[arg(short, long)]
        bootstrap: Vec<SocketAddr>,

        /// Act as the bootstrap node for this network
        #[arg(long)]
        bootstrap_node: bool,

        /// Storage root directory
        #[arg(short, long)]
        root: Option<String>,
    },

    /// Run a local three-node demo: store a value through one node and
    /// read it back
    Demo,
}

/// Daemon configuration.
#[derive(Debug, Clone)]
struct DaemonConfig {
    /// Listen address
    listen_addr: SocketAddr,
    /// Bootstrap nodes
    bootstrap_nodes: Vec<SocketAddr>,
    /// Whether this node hands out the peer directory
    is_bootstrap: bool,
    /// Storage root; defaults to `<listen-addr>_network`
    storage_root: Option<String>,
    /// Path of the encryption key file
    key_file: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:4400".parse().unwrap(),
            bootstrap_nodes: Vec::new(),
            is_bootstrap: false,
            storage_root: None,
            key_file: PathBuf::from("~/.silo/key"),
        }
    }
}

/// Load configuration from TOML file.
fn load_config(path: &PathBuf) -> Result<DaemonConfig> {
    let path = expand_tilde(path);

    if !path.exists() {
        info!("no config file found at {:?}, using defaults", path);
        return Ok(DaemonConfig::default());
    }

    let content = std::fs::read_to_string(&path).context("failed to read config file")?;
    let toml: toml::Value = content.parse().context("failed to parse config file")?;

    let mut config = DaemonConfig::default();

    if let Some(network) = toml.get("network") {
        if let Some(listen) = network.get("listen").and_then(|v| v.as_str()) {
            config.listen_addr = listen.parse().context("invalid listen address")?;
        }
        if let Some(bootstrap) = network.get("bootstrap").and_then(|v| v.as_array()) {
            for value in bootstrap {
                if let Some(addr) = value.as_str() {
                    config
                        .bootstrap_nodes
                        .push(addr.parse().context("invalid bootstrap address")?);
                }
            }
        }
        if let Some(is_bootstrap) = network.get("is_bootstrap").and_then(|v| v.as_bool()) {
            config.is_bootstrap = is_bootstrap;
        }
    }

    if let Some(storage) = toml.get("storage") {
        if let Some(root) = storage.get("root").and_then(|v| v.as_str()) {
            config.storage_root = Some(root.to_string());
        }
    }

    if let Some(crypto) = toml.get("crypto") {
        if let Some(key_file) = crypto.get("key_file").and_then(|v| v.as_str()) {
            config.key_file = PathBuf::from(key_file);
        }
    }

    Ok(config)
}

/// Expand ~ to home directory.
fn expand_tilde(path: &PathBuf) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.clone()
}

/// Load the encryption key, generating and persisting one on first run.
fn load_or_generate_key(path: &PathBuf) -> Result<Vec<u8>> {
    let path = expand_tilde(path);

    if path.exists() {
        let content = std::fs::read_to_string(&path).context("failed to read key file")?;
        let key = hex::decode(content.trim()).context("invalid key hex")?;
        anyhow::ensure!(
            matches!(key.len(), 16 | 24 | 32),
            "key must be 16, 24, or 32 bytes, got {}",
            key.len()
        );
        return Ok(key);
    }

    info!("generating new encryption key");
    let mut key = vec![0u8; 32];
    OsRng.fill_bytes(&mut key);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("failed to create key directory")?;
    }
    std::fs::write(&path, hex::encode(&key)).context("failed to write key file")?;
    info!("saved new key to {:?}", path);

    Ok(key)
}

/// Runs one node until ctrl-c.
async fn run(config: DaemonConfig) -> Result<()> {
    let key = load_or_generate_key(&config.key_file)?;
    let root = config
        .storage_root
        .clone()
        .unwrap_or_else(|| format!("{}_network", config.listen_addr));

    let mut server_config = ServerConfig::new(config.listen_addr, root, key);
    server_config.bootstrap_nodes = config.bootstrap_nodes.clone();
    server_config.is_bootstrap = config.is_bootstrap;

    let server = FileServer::new(server_config);
    let handle = tokio::spawn(Arc::clone(&server).start());

    info!("silo daemon running");
    println!("silo daemon running");
    println!("  listen: {}", config.listen_addr);
    println!();
    println!("Press Ctrl+C to stop");

    signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    info!("received shutdown signal");

    server.stop();
    let _ = handle.await;
    Ok(())
}

/// Spins up a local three-node network, stores a value through the first
/// node, and reads it back.
async fn demo() -> Result<()> {
    let key = {
        let mut key = vec![0u8; 32];
        OsRng.fill_bytes(&mut key);
        key
    };

    let make = |listen: &str, bootstrap: Vec<SocketAddr>, is_bootstrap: bool| {
        let listen: SocketAddr = listen.parse().unwrap();
        let mut config = ServerConfig::new(listen, format!("{listen}_network"), key.clone());
        config.bootstrap_nodes = bootstrap;
        config.is_bootstrap = is_bootstrap;
        FileServer::new(config)
    };

    let s1 = make("127.0.0.1:3000", vec![], true);
    let s2 = make("127.0.0.1:5000", vec!["127.0.0.1:3000".parse()?], false);
    let s3 = make("127.0.0.1:7000", vec!["127.0.0.1:3000".parse()?], false);

    tokio::spawn(Arc::clone(&s1).start());
    sleep(Duration::from_millis(20)).await;
    tokio::spawn(Arc::clone(&s2).start());
    sleep(Duration::from_millis(20)).await;
    tokio::spawn(Arc::clone(&s3).start());
    sleep(Duration::from_millis(100)).await;

    println!("---------------- storing ----------------");
    s1.store("myfile", &mut Cursor::new(b"Hi, this went through the network".to_vec()))
        .await?;
    sleep(Duration::from_millis(500)).await;

    println!("---------------- fetching ----------------");
    let mut reader = s2.get("myfile").await?;
    let mut data = Vec::new();
    std::io::Read::read_to_end(&mut reader, &mut data)?;
    println!("{}", String::from_utf8_lossy(&data));

    s1.stop();
    s2.stop();
    s3.stop();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).context("failed to set up logging")?;

    let mut config = load_config(&cli.config)?;

    match cli.command.unwrap_or(Commands::Run {
        listen: None,
        bootstrap: Vec::new(),
        bootstrap_node: false,
        root: None,
    }) {
        Commands::Run {
            listen,
            bootstrap,
            bootstrap_node,
            root,
        } => {
            if let Some(addr) = listen {
                config.listen_addr = addr;
            }
            if !bootstrap.is_empty() {
                config.bootstrap_nodes = bootstrap;
            }
            if bootstrap_node {
                config.is_bootstrap = true;
            }
            if root.is_some() {
                config.storage_root = root;
            }

            run(config).await
        }
        Commands::Demo => demo().await,
    }
}
