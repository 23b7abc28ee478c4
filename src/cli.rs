//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Resource access token broker
#[derive(Parser, Debug)]
#[command(name = "access-broker")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "ACCESS_BROKER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "ACCESS_BROKER_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "ACCESS_BROKER_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "ACCESS_BROKER_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "ACCESS_BROKER_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the broker server (default)
    Serve,

    /// Check the resource catalog for inconsistencies
    CheckCatalog {
        /// Realm to check (defaults to every realm in the catalog)
        #[arg(long)]
        realm: Option<String>,
    },
}
