//! CLI definitions for the syndicate host.
//!
//! Flags override the YAML config; everything has a working default so
//! `syndicate-host` with no arguments starts a usable server.

use clap::{Parser, Subcommand};

/// Syndicate coordination host
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "syndicate.yaml")]
    pub config: String,

    /// Port to listen on (overrides config)
    #[arg(short, long, global = true)]
    pub port: Option<u16>,

    /// Bind address (overrides config)
    #[arg(short, long, global = true)]
    pub bind: Option<String>,

    /// Disable mDNS advertisement
    #[arg(long, global = true)]
    pub no_mdns: bool,

    /// Disable the AI coprocessor integration
    #[arg(long, global = true)]
    pub no_coprocessor: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the host (default if no subcommand given)
    Serve,
}
