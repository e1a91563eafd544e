use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "ember",
    about = "Ember: ephemeral anonymous file drop with burn-after-read",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the HTTP server
    Serve(ServeArgs),
    /// Run one expiry sweep over a storage directory
    Sweep(SweepArgs),
    /// List stored objects
    List(StorageArgs),
    /// Store a local file
    Put(PutArgs),
    /// Retrieve an object (consumes burn objects)
    Get(GetArgs),
}

#[derive(Args)]
pub struct StorageArgs {
    #[arg(long, env = "EMBER_STORAGE_DIR", default_value = "ephemeral_storage")]
    pub storage: PathBuf,
}

#[derive(Args)]
pub struct ServeArgs {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub bind: Option<SocketAddr>,
    #[arg(long)]
    pub storage: Option<PathBuf>,
}

#[derive(Args)]
pub struct SweepArgs {
    #[command(flatten)]
    pub storage: StorageArgs,
    /// Expiration age in seconds
    #[arg(long, default_value_t = ember_vault::config::DEFAULT_EXPIRATION_SECS)]
    pub ttl: u64,
}

#[derive(Args)]
pub struct PutArgs {
    pub file: PathBuf,
    #[command(flatten)]
    pub storage: StorageArgs,
    /// Delete after the first download
    #[arg(long)]
    pub burn: bool,
}

#[derive(Args)]
pub struct GetArgs {
    pub id: String,
    #[command(flatten)]
    pub storage: StorageArgs,
    /// Write to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}
