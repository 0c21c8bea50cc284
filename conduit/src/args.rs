use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Conduit LLM gateway
#[derive(Debug, Parser)]
#[command(name = "conduit", about = "Multi-provider LLM gateway core")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "conduit.toml", env = "CONDUIT_CONFIG")]
    pub config: PathBuf,

    /// Log filter directive
    #[arg(long, default_value = "info", env = "CONDUIT_LOG")]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Send one canonical request and print the response as JSON
    Dispatch(DispatchArgs),
    /// Follow config change notifications until interrupted
    Watch,
}

#[derive(Debug, clap::Args)]
pub struct DispatchArgs {
    /// Target provider name
    #[arg(short, long)]
    pub provider: String,

    /// Virtual key secret to authorize with
    #[arg(long, env = "CONDUIT_VIRTUAL_KEY")]
    pub virtual_key: Option<String>,

    /// Name of the provider API key to use instead of the default
    #[arg(long)]
    pub key: Option<String>,

    /// Stream the response, printing one chunk per line
    #[arg(long)]
    pub stream: bool,

    /// Canonical request JSON; `-` reads stdin
    pub request: PathBuf,
}
