//! tcprelay
//!
//! A simple TCP connection relay supporting IPv4, IPv6 and connections
//! from IPv6 to IPv4 endpoints and vice versa.
//!
//! # Architecture Overview
//!
//! ```text
//!   Client ──▶ listener registry ──▶ run loop ──▶ connection registry ──▶ Remote
//!                (accept tasks)      (dispatch)     (relay tasks,
//!                                        ▲           bounded buffers)
//!                                        │
//!                 signals (reload / dump / terminate)
//!                 config watcher (optional hot reload)
//! ```
//!
//! Listeners are defined either on the command line (single-listener
//! mode) or in a TOML config file; SIGHUP re-reads the file and
//! reconciles the listener set without interrupting unchanged endpoints
//! or open relays.

use std::error::Error;
use std::path::PathBuf;

use clap::Parser;

use tcp_relay::config::loader::load_config;
use tcp_relay::config::schema::{ListenSpec, RelayConfig, DEFAULT_BUFFER_SIZE};
use tcp_relay::config::watcher::ConfigWatcher;
use tcp_relay::lifecycle::spawn_signal_listener;
use tcp_relay::net::endpoint::Family;
use tcp_relay::net::server::RelayServer;
use tcp_relay::observability::logging::{self, LogTarget};

#[derive(Parser)]
#[command(name = "tcprelay")]
#[command(about = "A simple TCP connection relay supporting IPv4, IPv6 and cross-family forwarding", long_about = None)]
struct Cli {
    /// Configuration file with listener definitions.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Local address to bind (wildcard when omitted).
    #[arg(short = 'l', long, conflicts_with = "config")]
    local_addr: Option<String>,

    /// Local port to listen on.
    #[arg(short = 'p', long, conflicts_with = "config")]
    local_port: Option<u16>,

    /// Remote address to relay connections to.
    #[arg(short = 'r', long, conflicts_with = "config")]
    remote_addr: Option<String>,

    /// Remote port to relay connections to.
    #[arg(short = 'o', long, conflicts_with = "config")]
    remote_port: Option<u16>,

    /// Source address for the outbound side of each connection.
    #[arg(short = 's', long, conflicts_with = "config")]
    source_addr: Option<String>,

    /// Resolve addresses as IPv4 only.
    #[arg(short = '4', long, conflicts_with = "ipv6")]
    ipv4: bool,

    /// Resolve addresses as IPv6 only.
    #[arg(short = '6', long)]
    ipv6: bool,

    /// Relay buffer size in bytes, per direction and connection.
    #[arg(short = 'b', long)]
    buffer_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Log target: stdout, stderr or file:/path (repeatable).
    #[arg(short = 'L', long = "log-target")]
    log_targets: Vec<String>,

    /// Re-apply the config file automatically when it changes on disk.
    #[arg(long, requires = "config")]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => single_listener_config(&cli)?,
    };
    if let Some(size) = cli.buffer_size {
        config.buffer_size = size;
    }
    if let Some(level) = &cli.log_level {
        config.log.level = level.clone();
    }
    if !cli.log_targets.is_empty() {
        config.log.targets = cli.log_targets.clone();
    }

    let targets = config
        .log
        .targets
        .iter()
        .map(|t| t.parse::<LogTarget>())
        .collect::<Result<Vec<_>, _>>()?;
    logging::init(&config.log.level, &targets)?;

    tracing::info!("tcprelay starting");

    if config.buffer_size == 0 {
        tracing::warn!(
            default = DEFAULT_BUFFER_SIZE,
            "illegal buffer size 0, using default"
        );
        config.buffer_size = DEFAULT_BUFFER_SIZE;
    }
    tracing::info!(
        buffer_size = config.buffer_size,
        max_connections = config.max_connections,
        listeners = config.listen.len(),
        "configuration loaded"
    );

    let ctrl = spawn_signal_listener()?;

    let (watcher_guard, updates) = if cli.watch {
        let path = cli.config.as_ref().expect("clap enforces --config with --watch");
        let (watcher, rx) = ConfigWatcher::new(path);
        (Some(watcher.run()?), Some(rx))
    } else {
        (None, None)
    };

    let mut server = RelayServer::new(config.clone(), cli.config.clone());
    // a startup bind or resolution failure is fatal; reloads are not
    server.apply(&config.listen).await?;

    server.run(ctrl, updates).await;
    drop(watcher_guard);

    tracing::info!("normal shutdown");
    Ok(())
}

fn single_listener_config(cli: &Cli) -> Result<RelayConfig, Box<dyn Error>> {
    if cli.local_port.is_none() && cli.remote_addr.is_none() && cli.remote_port.is_none() {
        return Err(
            "either --config or --local-port, --remote-addr and --remote-port must be given"
                .into(),
        );
    }
    let family = if cli.ipv4 {
        Family::Ipv4
    } else if cli.ipv6 {
        Family::Ipv6
    } else {
        Family::Any
    };

    Ok(RelayConfig {
        listen: vec![ListenSpec {
            local_addr: cli.local_addr.clone(),
            local_port: cli.local_port,
            local_family: family,
            remote_addr: cli.remote_addr.clone(),
            remote_port: cli.remote_port,
            remote_family: family,
            source_addr: cli.source_addr.clone(),
        }],
        ..Default::default()
    })
}
