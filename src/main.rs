//! Syndicate Host
//!
//! A single-process coordination server: one authoritative host, many
//! browser clients over WebSocket, with a small HTTP surface for
//! tooling.

use anyhow::Result;
use clap::Parser;
use std::fs::OpenOptions;
use std::path::Path;
use std::time::Instant;
use syndicate_host::cli::{Cli, Command};
use syndicate_host::config::Config;
use syndicate_host::discovery;
use syndicate_host::host::Host;
use syndicate_host::server::{self, AppState};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on --log option
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    match cli.log.as_str() {
        "0" | "off" => {
            // No logging
        }
        "1" | "stdout" => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stdout)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        "2" | "stderr" => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        filename => {
            // Log to file (append mode)
            let file = OpenOptions::new().create(true).append(true).open(filename)?;
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(file)
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    let mut config = Config::load(Path::new(&cli.config))?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(bind) = &cli.bind {
        config.server.bind = bind.clone();
    }
    if cli.no_mdns {
        config.server.mdns = false;
    }
    if cli.no_coprocessor {
        config.coprocessor.enabled = false;
    }

    match cli.command {
        Some(Command::Serve) | None => run_host(config).await,
    }
}

async fn run_host(config: Config) -> Result<()> {
    info!("Starting Syndicate Host v{}", env!("CARGO_PKG_VERSION"));
    info!("Port: {}", config.server.port);
    info!("Coprocessor: {}", config.coprocessor.enabled);

    let network_ip = discovery::network_ip();
    if let Some(ip) = &network_ip {
        info!("LAN address: {}", ip);
    }

    // Kept alive for the lifetime of the process; dropping it would
    // unregister the mDNS service.
    let _advertisement = if config.server.mdns {
        match network_ip
            .as_deref()
            .map(|ip| discovery::Advertisement::start("syndicate-host", ip, config.server.port))
        {
            Some(Ok(ad)) => Some(ad),
            Some(Err(err)) => {
                warn!("mDNS advertisement failed: {:#}", err);
                None
            }
            None => None,
        }
    } else {
        None
    };

    let port = config.server.port;
    let bind = config.server.bind.clone();
    let max_tasks = config.protocol.max_tasks;
    let host = Host::spawn(config, network_ip.clone());

    let state = AppState {
        host,
        port,
        network_ip,
        started: Instant::now(),
        max_tasks,
    };
    server::serve(state, &bind).await
}
